#![allow(unreachable_pub)]

mod endpoint;
mod error;
mod remote;
mod request;
mod response;

pub use endpoint::{Endpoint, PathTemplate};
pub use error::{BoxError, ErrorCategory, ErrorKind};
pub use remote::SerializableError;
pub use request::{Request, RequestBody, RequestBuilder};
pub use response::{BodyStream, Release, Response};

/// The switchyard `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
