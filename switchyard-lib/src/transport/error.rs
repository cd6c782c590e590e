use std::error::Error;
use std::io;

use crate::ErrorKind;

impl From<reqwest::Error> for ErrorKind {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::InvalidRequest(Box::new(e))
        } else if is_timeout(&e) {
            Self::Timeout(Box::new(e))
        } else {
            // Everything else, including hyper's incomplete-message and
            // canceled errors, means the exchange broke off mid-flight
            Self::Connection(Box::new(e))
        }
    }
}

/// A timeout may be reported by reqwest itself, by hyper, or by the socket
/// somewhere down the source chain.
fn is_timeout(e: &reqwest::Error) -> bool {
    if e.is_timeout() {
        return true;
    }
    if let Some(hyper_error) = get_source_error_type::<hyper::Error>(e)
        && hyper_error.is_timeout()
    {
        return true;
    }
    get_source_error_type::<io::Error>(e).is_some_and(|io| io.kind() == io::ErrorKind::TimedOut)
}

/// Downcasts the given err source into T.
fn get_source_error_type<T: Error + 'static>(err: &dyn Error) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(typed) = err.downcast_ref::<T>() {
            return Some(typed);
        }

        source = err.source();
    }
    None
}
