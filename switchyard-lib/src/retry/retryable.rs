use http::{Method, StatusCode};

use crate::config::{ChannelConfig, IdempotencyPolicy, RetryOnTimeout, ServerQos};
use crate::{ErrorKind, Response, Result};

/// The parts of a [`ChannelConfig`] that decide whether to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Whether timeouts are retried
    pub retry_on_timeout: RetryOnTimeout,
    /// Whether QoS errors are retried
    pub server_qos: ServerQos,
    /// Which methods may be retried after a 5xx
    pub idempotency: IdempotencyPolicy,
}

impl From<&ChannelConfig> for RetryPolicy {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            retry_on_timeout: config.retry_on_timeout,
            server_qos: config.server_qos,
            idempotency: config.idempotency,
        }
    }
}

/// An extension trait to help determine if the outcome of a call is worth
/// another attempt.
pub(crate) trait RetryExt {
    fn should_retry(&self, policy: &RetryPolicy, method: &Method) -> bool;
}

impl RetryExt for StatusCode {
    fn should_retry(&self, policy: &RetryPolicy, method: &Method) -> bool {
        self.is_server_error()
            && *self != StatusCode::SERVICE_UNAVAILABLE
            && policy.idempotency.permits(method)
    }
}

impl RetryExt for ErrorKind {
    #[allow(clippy::match_same_arms)]
    fn should_retry(&self, policy: &RetryPolicy, _method: &Method) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Timeout(_) => {
                policy.retry_on_timeout == RetryOnTimeout::DangerousEnableAtRiskOfRetryStorms
            }
            Self::Qos { .. } => policy.server_qos == ServerQos::AutomaticRetry,
            Self::Cancelled => false,
            _ => false,
        }
    }
}

impl RetryExt for Result<Response> {
    fn should_retry(&self, policy: &RetryPolicy, method: &Method) -> bool {
        match self {
            Ok(response) => response.status().should_retry(policy, method),
            Err(error) => error.should_retry(policy, method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::HostKey;
    use rstest::rstest;
    use std::io;

    fn policy() -> RetryPolicy {
        RetryPolicy::from(&ChannelConfig::default())
    }

    fn qos() -> ErrorKind {
        ErrorKind::Qos {
            status: StatusCode::TOO_MANY_REQUESTS,
            host: HostKey::from("a.example"),
            retry_after: None,
        }
    }

    fn timeout() -> ErrorKind {
        ErrorKind::Timeout(Box::new(io::Error::from(io::ErrorKind::TimedOut)))
    }

    #[rstest]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, Method::GET, true)]
    #[case(StatusCode::BAD_GATEWAY, Method::PUT, true)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, Method::POST, false)]
    #[case(StatusCode::SERVICE_UNAVAILABLE, Method::GET, false)]
    #[case(StatusCode::NOT_FOUND, Method::GET, false)]
    #[case(StatusCode::OK, Method::GET, false)]
    fn test_status_should_retry(
        #[case] status: StatusCode,
        #[case] method: Method,
        #[case] retry: bool,
    ) {
        assert_eq!(status.should_retry(&policy(), &method), retry);
    }

    #[test]
    fn test_error_should_retry() {
        let connection = ErrorKind::Connection(Box::new(io::Error::from(
            io::ErrorKind::ConnectionReset,
        )));
        assert!(connection.should_retry(&policy(), &Method::POST));
        assert!(qos().should_retry(&policy(), &Method::POST));
        assert!(!timeout().should_retry(&policy(), &Method::GET));
        assert!(!ErrorKind::Cancelled.should_retry(&policy(), &Method::GET));
        assert!(!ErrorKind::Rejected.should_retry(&policy(), &Method::GET));
    }

    #[test]
    fn test_policy_switches() {
        let policy = RetryPolicy {
            retry_on_timeout: RetryOnTimeout::DangerousEnableAtRiskOfRetryStorms,
            server_qos: ServerQos::Propagate429And503ToCaller,
            idempotency: IdempotencyPolicy::Always,
        };
        assert!(timeout().should_retry(&policy, &Method::GET));
        assert!(!qos().should_retry(&policy, &Method::GET));
        assert!(StatusCode::INTERNAL_SERVER_ERROR.should_retry(&policy, &Method::POST));
    }
}
