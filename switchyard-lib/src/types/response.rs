use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::io;

use crate::types::{ErrorKind, Result};

/// The body of a [`Response`] as a stream of chunks
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// How a [`Response`] gave up its resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// [`Response::close`] was called, directly or through a consuming reader
    Closed,
    /// The response was dropped without being closed
    Dropped,
}

type ReleaseHook = Box<dyn FnOnce(Release) + Send>;

/// The response to a single exchange.
///
/// A response owns transport resources (a connection, buffers) until it is
/// released. Release happens exactly once: either explicitly through
/// [`Response::close`] (or a consuming reader such as [`Response::bytes`]),
/// or implicitly when the response is dropped. Dropping works, but it is
/// reported as [`Release::Dropped`] to anyone watching for leaks, so callers
/// should close responses they do not read to the end.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<BodyStream>,
    hooks: Vec<ReleaseHook>,
    closed: bool,
}

impl Response {
    /// Create a new response from its parts
    #[must_use]
    pub fn new<S>(status: StatusCode, headers: HeaderMap, body: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            status,
            headers,
            body: Some(body.boxed()),
            hooks: Vec::new(),
            closed: false,
        }
    }

    /// Create a response with an in-memory body
    #[must_use]
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self::new(status, headers, stream::once(async move { Ok(body) }))
    }

    /// Create a response without headers or body
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), stream::empty())
    }

    /// Status code of the response
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers. A name may map to several values.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Access the body stream. Returns `None` once the response is closed.
    pub fn body_mut(&mut self) -> Option<&mut BodyStream> {
        self.body.as_mut()
    }

    /// Returns `true` once [`Response::close`] ran
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Register a hook that runs when this response releases its resources.
    ///
    /// Hooks run in reverse registration order, so the outermost wrapper
    /// observes the release first. A hook registered on an already closed
    /// response runs immediately.
    pub fn on_release(&mut self, hook: impl FnOnce(Release) + Send + 'static) {
        if self.closed {
            hook(Release::Closed);
        } else {
            self.hooks.push(Box::new(hook));
        }
    }

    /// Release the body and all transport resources. Idempotent.
    pub fn close(&mut self) {
        self.release(Release::Closed);
    }

    fn release(&mut self, how: Release) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.body = None;
        while let Some(hook) = self.hooks.pop() {
            hook(how);
        }
    }

    /// Read the whole body, then close the response.
    ///
    /// The response is closed even if the returned future is dropped before
    /// the body was read to the end.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Connection`] if the body stream fails midway.
    pub async fn bytes(self) -> Result<Bytes> {
        let mut reading = Reading(self);
        let mut buffer = BytesMut::new();
        if let Some(body) = reading.0.body.as_mut() {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| ErrorKind::Connection(Box::new(e)))?;
                buffer.extend_from_slice(&chunk);
            }
        }
        Ok(buffer.freeze())
    }

    /// Read the whole body as JSON, then close the response.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Serialization`] if the body is not valid JSON
    /// for `T`, or a connection error if the body cannot be read.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Owns a response while its body is consumed and closes it afterwards
struct Reading(Response);

impl Drop for Reading {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        self.release(Release::Dropped);
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
