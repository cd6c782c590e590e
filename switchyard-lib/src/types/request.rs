use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The body of a [`Request`].
///
/// Bodies are kept fully in memory so that a request can be resent on retry
/// without any coordination with the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    content_type: HeaderValue,
    bytes: Bytes,
}

impl RequestBody {
    /// Content type announced for this body
    #[must_use]
    pub const fn content_type(&self) -> &HeaderValue {
        &self.content_type
    }

    /// Raw body bytes
    #[must_use]
    pub const fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Parts {
    headers: HeaderMap,
    query: Vec<(String, String)>,
    path_params: BTreeMap<String, String>,
    body: Option<RequestBody>,
}

/// One call's worth of request data.
///
/// A `Request` is built once with [`Request::builder`] and never mutated
/// afterwards. Cloning is cheap, which lets the retry layer resend it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request(Arc<Parts>);

impl Request {
    /// Start building a request
    #[must_use]
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Request headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.0.headers
    }

    /// Query parameters, in insertion order, duplicates allowed
    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.0.query
    }

    /// Path parameters referenced by the endpoint's path template
    #[must_use]
    pub fn path_params(&self) -> &BTreeMap<String, String> {
        &self.0.path_params
    }

    /// Optional request body
    #[must_use]
    pub fn body(&self) -> Option<&RequestBody> {
        self.0.body.as_ref()
    }
}

/// Builder for [`Request`]
#[derive(Debug, Default)]
pub struct RequestBuilder {
    parts: Parts,
}

impl RequestBuilder {
    /// Set a header. Setting the same header twice keeps the last value.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.parts.headers.insert(name, value);
        self
    }

    /// Append a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.query.push((key.into(), value.into()));
        self
    }

    /// Set a path parameter
    #[must_use]
    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.path_params.insert(name.into(), value.into());
        self
    }

    /// Attach a body. The content type is also sent as `Content-Type`.
    #[must_use]
    pub fn body(mut self, content_type: HeaderValue, bytes: impl Into<Bytes>) -> Self {
        self.parts.headers.insert(CONTENT_TYPE, content_type.clone());
        self.parts.body = Some(RequestBody {
            content_type,
            bytes: bytes.into(),
        });
        self
    }

    /// Freeze the request
    #[must_use]
    pub fn build(self) -> Request {
        Request(Arc::new(self.parts))
    }
}
