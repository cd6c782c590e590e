//! `switchyard` turns a list of backend URIs into a resilient channel for
//! calling a remote service.
//!
//! A call passes through a fixed pipeline: failed attempts are retried with
//! backoff, each attempt is routed to a host by the node selector, hosts
//! are guarded by adaptive concurrency limits, and responses that are
//! dropped without being closed are reported as leaks. The raw transport at
//! the bottom is pluggable; a reqwest-based one ships in [`transport`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use http::Method;
//! use switchyard_lib::transport::{ReqwestChannelFactory, TransportConfig};
//! use switchyard_lib::{
//!     Channel, ChannelConfig, Clients, Endpoint, Request, Resources, Result, ServicesConfig,
//! };
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let factory = ReqwestChannelFactory::new(&TransportConfig::default())?;
//!     let clients = Clients::new(Resources::new("billing-client", Arc::new(factory)));
//!
//!     let uris = vec![
//!         Url::parse("https://billing-1.example/api")?,
//!         Url::parse("https://billing-2.example/api")?,
//!     ];
//!     let config = ServicesConfig::default()
//!         .with_service("billing", ChannelConfig::default().with_uris(uris));
//!     let channel = clients.channel("billing", &config)?;
//!
//!     let endpoint = Endpoint::new("billing", "getInvoice", "1.0.0", Method::GET, "/invoices/{id}");
//!     let request = Request::builder().path_param("id", "42").build();
//!     let invoice: serde_json::Value = channel.execute(&endpoint, request).await?.json().await?;
//!     println!("{invoice}");
//!     Ok(())
//! }
//! ```
//!
//! Every [`CallFuture`] can be cancelled; cancellation reaches whichever
//! stage is active at that moment, be it a backoff timer, a queued permit
//! or the transport exchange.

mod types;

pub mod blocking;
pub mod channel;
pub mod config;
pub mod future;
pub mod leak;
pub mod limiter;
pub mod live;
pub mod retry;
pub mod selector;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use channel::{Channel, ChannelFactory, Clients, Resources, ServiceChannel};
pub use config::{
    ChannelConfig, ClientQos, IdempotencyPolicy, LimiterConfig, NodeSelectionStrategy,
    RetryOnTimeout, ServerQos, ServicesConfig,
};
pub use future::{CallFuture, Canceller, Tracker};
pub use leak::LeakDetector;
pub use live::LiveChannel;
pub use selector::{HostKey, HostStats, HostStatsMap};
pub use types::*;
