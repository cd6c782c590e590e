use http::StatusCode;
use serde::{Serialize, Serializer};
use std::convert::Infallible;
use std::time::Duration;
use thiserror::Error;

use crate::selector::HostKey;
use crate::types::SerializableError;

/// A boxed error returned by a transport
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Possible errors when executing a call through `switchyard_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The transport failed to connect or lost the connection mid-exchange
    #[error("Network error while trying to connect to a remote host: {0}")]
    Connection(#[source] BoxError),

    /// The transport gave up waiting for the remote host
    #[error("Request timed out: {0}")]
    Timeout(#[source] BoxError),

    /// The remote host signalled overload (429 or 503)
    #[error("Host {host} responded with {status}, backing off")]
    Qos {
        /// Status code of the QoS response
        status: StatusCode,
        /// Host which sent the signal
        host: HostKey,
        /// Server-provided hint from the `Retry-After` header
        retry_after: Option<Duration>,
    },

    /// The remote host answered with an application-level error
    #[error("Remote error {status}{}", .error.as_ref().map(|e| format!(": {}", e.error_name)).unwrap_or_default())]
    Remote {
        /// Status code of the error response
        status: StatusCode,
        /// Structured error body, if the server sent one
        error: Option<SerializableError>,
    },

    /// The response body could not be decoded
    #[error("Failed to decode response body: {0}")]
    Serialization(#[source] BoxError),

    /// The call was cancelled by the caller
    #[error("Call was cancelled")]
    Cancelled,

    /// No configuration exists for the requested service
    #[error("Service `{0}` is not configured")]
    UnknownService(String),

    /// The service is configured without any URIs
    #[error("Service `{0}` has no URIs configured")]
    NoUris(String),

    /// The endpoint path references a parameter the request does not carry
    #[error("Missing path parameter `{0}`")]
    MissingPathParam(String),

    /// A URL could not be built from the base URI and the endpoint path
    #[error("Cannot build request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request could not be converted for the transport
    #[error("Invalid request: {0}")]
    InvalidRequest(#[source] BoxError),

    /// Work was submitted to an executor queue after it was poisoned
    #[error("Task rejected: executor queue no longer accepts work")]
    Rejected,

    /// A background task was requested outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// The coarse taxonomy every [`ErrorKind`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    /// Network or connect-level failure, including timeouts
    Connection,
    /// Server-side overload signal
    Qos,
    /// Application-level error returned by the server
    Remote,
    /// Malformed response body
    Serialization,
    /// Caller-initiated cancellation
    Cancellation,
    /// Missing or invalid service configuration
    Configuration,
    /// Misuse of the client itself
    Internal,
}

impl ErrorKind {
    /// Map this error onto its [`ErrorCategory`]
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) | Self::Timeout(_) => ErrorCategory::Connection,
            Self::Qos { .. } => ErrorCategory::Qos,
            Self::Remote { .. } => ErrorCategory::Remote,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::UnknownService(_) | Self::NoUris(_) => ErrorCategory::Configuration,
            Self::MissingPathParam(_)
            | Self::InvalidUrl(_)
            | Self::InvalidRequest(_)
            | Self::Rejected
            | Self::NoRuntime(_) => ErrorCategory::Internal,
        }
    }

    /// Returns `true` if this error stems from a caller-initiated cancellation
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The HTTP status attached to this error, if any
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Qos { status, .. } | Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<serde_json::Error> for ErrorKind {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(Box::new(e))
    }
}

impl From<http::Error> for ErrorKind {
    fn from(e: http::Error) -> Self {
        Self::InvalidRequest(Box::new(e))
    }
}

impl From<http::header::InvalidHeaderValue> for ErrorKind {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidRequest(Box::new(e))
    }
}

impl From<Infallible> for ErrorKind {
    fn from(_: Infallible) -> Self {
        // tautological
        unreachable!()
    }
}
