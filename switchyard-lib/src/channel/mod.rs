//! The channel abstraction and the composed per-service channel.
//!
//! A [`Channel`] executes one call and hands back a [`CallFuture`]. Every
//! layer of the pipeline is a `Channel` wrapping another one, and the raw
//! transports at the bottom are produced by a [`ChannelFactory`].

mod service;

pub use service::{Clients, Resources, ServiceChannel};

use std::sync::Arc;
use url::Url;

use crate::{CallFuture, Endpoint, Request, Response, Result};

/// Executes calls against a remote service
pub trait Channel: Send + Sync {
    /// Start a call. The returned future can be cancelled or dropped at any
    /// time; a response that was produced anyway gets released.
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response>;
}

impl<C: Channel + ?Sized> Channel for Arc<C> {
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response> {
        (**self).execute(endpoint, request)
    }
}

/// Creates the raw transport channel for one base URI
pub trait ChannelFactory: Send + Sync {
    /// Create a channel sending requests to `uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport can be set up for `uri`.
    fn create(&self, uri: &Url) -> Result<Arc<dyn Channel>>;
}

impl<F> ChannelFactory for F
where
    F: Fn(&Url) -> Result<Arc<dyn Channel>> + Send + Sync,
{
    fn create(&self, uri: &Url) -> Result<Arc<dyn Channel>> {
        self(uri)
    }
}
