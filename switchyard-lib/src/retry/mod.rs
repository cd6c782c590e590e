//! Retrying failed calls with backoff.
//!
//! Attempts run one after another, never concurrently. Each attempt goes
//! through the node selector again, so a retry can fail over to another
//! host. Once the budget is spent, the result of the last attempt is
//! returned as is.

mod backoff;
mod retryable;

pub use backoff::Backoff;
pub use retryable::RetryPolicy;

use std::sync::Arc;

use crate::config::ChannelConfig;
use crate::{CallFuture, Channel, Endpoint, ErrorKind, Request, Response};
use retryable::RetryExt;

/// Retries calls of the wrapped channel
pub struct RetryingChannel {
    inner: Arc<dyn Channel>,
    max_num_retries: u32,
    backoff: Backoff,
    policy: RetryPolicy,
}

impl RetryingChannel {
    /// Wrap `inner` with the retry settings of `config`
    #[must_use]
    pub fn new(inner: Arc<dyn Channel>, config: &ChannelConfig) -> Self {
        Self {
            inner,
            max_num_retries: config.max_num_retries,
            backoff: Backoff::new(config.backoff_slot_size, config.max_backoff),
            policy: RetryPolicy::from(config),
        }
    }
}

impl Channel for RetryingChannel {
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response> {
        let inner = Arc::clone(&self.inner);
        let endpoint = endpoint.clone();
        let max_num_retries = self.max_num_retries;
        let backoff = self.backoff;
        let policy = self.policy;

        CallFuture::with_tracker(move |tracker| async move {
            let mut attempt = 0;
            loop {
                let call = inner.execute(&endpoint, request.clone());
                tracker.follow(&call);
                let mut result = call.await;
                if attempt >= max_num_retries || !result.should_retry(&policy, endpoint.method()) {
                    return result;
                }

                let mut delay = backoff.delay(attempt);
                match &mut result {
                    Ok(response) => response.close(),
                    Err(ErrorKind::Qos {
                        retry_after: Some(hint),
                        ..
                    }) => delay = delay.max(*hint).min(backoff.cap()),
                    Err(_) => {}
                }
                log::debug!(
                    "{endpoint}: attempt {} failed ({}), retrying in {delay:?}",
                    attempt + 1,
                    describe(&result)
                );
                drop(result);

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        })
    }
}

fn describe(result: &crate::Result<Response>) -> String {
    match result {
        Ok(response) => response.status().to_string(),
        Err(error) => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdempotencyPolicy, RetryOnTimeout, ServerQos};
    use crate::selector::{HostKey, Node, NodeSelectingChannel};
    use crate::test_utils::{Reply, StubChannel, StubFactory, endpoint, uris};
    use crate::{ChannelFactory, ErrorKind};
    use http::{HeaderMap, HeaderValue, Method, StatusCode, header::RETRY_AFTER};
    use std::time::Duration;
    use tokio::time::Instant;

    fn config(max_num_retries: u32) -> ChannelConfig {
        ChannelConfig::builder()
            .max_num_retries(max_num_retries)
            .backoff_slot_size(Duration::from_millis(100))
            .max_backoff(Duration::from_secs(1))
            .build()
    }

    fn retrying(stub: &Arc<StubChannel>, config: &ChannelConfig) -> RetryingChannel {
        RetryingChannel::new(stub.clone(), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_attempts() {
        let stub = Arc::new(StubChannel::new(StatusCode::OK));
        stub.set(Reply::Connection);
        let channel = retrying(&stub, &config(3));

        let error = channel
            .execute(&endpoint(Method::GET), Request::default())
            .await
            .unwrap_err();
        assert!(matches!(error, ErrorKind::Connection(_)));
        assert_eq!(stub.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_is_one_attempt() {
        let stub = Arc::new(StubChannel::new(StatusCode::OK));
        stub.set(Reply::Connection);
        let channel = retrying(&stub, &config(0));
        assert!(channel
            .execute(&endpoint(Method::GET), Request::default())
            .await
            .is_err());
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let stub = Arc::new(StubChannel::new(StatusCode::OK));
        stub.push(Reply::Connection);
        stub.push(Reply::Connection);
        let channel = retrying(&stub, &config(4));

        let started = Instant::now();
        let mut response = channel
            .execute(&endpoint(Method::GET), Request::default())
            .await
            .unwrap();
        response.close();
        assert_eq!(stub.calls(), 3);
        // slot 100ms: first delay in [100, 200], second in [200, 300]
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() <= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_respect_idempotency() {
        let stub = Arc::new(StubChannel::new(StatusCode::INTERNAL_SERVER_ERROR));
        let channel = retrying(&stub, &config(2));

        let response = channel
            .execute(&endpoint(Method::GET), Request::default())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(stub.calls(), 3);
        // the two retried responses were closed, the last one is returned
        assert_eq!(stub.closed(), 2);
        drop(response);

        let response = channel
            .execute(&endpoint(Method::POST), Request::default())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(stub.calls(), 4);
        drop(response);

        let never = ChannelConfig {
            idempotency: IdempotencyPolicy::Never,
            ..config(2)
        };
        let channel = retrying(&stub, &never);
        drop(channel.execute(&endpoint(Method::GET), Request::default()).await);
        assert_eq!(stub.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_retry_only_when_enabled() {
        let stub = Arc::new(StubChannel::new(StatusCode::OK));
        stub.set(Reply::Timeout);

        let channel = retrying(&stub, &config(2));
        assert!(channel
            .execute(&endpoint(Method::GET), Request::default())
            .await
            .is_err());
        assert_eq!(stub.calls(), 1);

        let storms = ChannelConfig {
            retry_on_timeout: RetryOnTimeout::DangerousEnableAtRiskOfRetryStorms,
            ..config(2)
        };
        let channel = retrying(&stub, &storms);
        assert!(channel
            .execute(&endpoint(Method::GET), Request::default())
            .await
            .is_err());
        assert_eq!(stub.calls(), 4);
    }

    fn selector(factory: &StubFactory, config: &ChannelConfig) -> Arc<NodeSelectingChannel> {
        let nodes = config
            .uris
            .iter()
            .map(|uri| Node::new(uri.clone(), factory.create(uri).unwrap(), None).unwrap())
            .collect();
        Arc::new(NodeSelectingChannel::new("test-service", config, nodes))
    }

    #[tokio::test(start_paused = true)]
    async fn test_qos_fails_over() {
        let factory = StubFactory::new(StatusCode::OK);
        let config = config(1).with_uris(uris(2));
        let selector = selector(&factory, &config);
        let pinned = selector.pinned().unwrap().clone();
        let uri = config
            .uris
            .iter()
            .find(|uri| HostKey::try_from(*uri).unwrap() == pinned)
            .unwrap();
        factory
            .stub(uri)
            .push(Reply::Status(StatusCode::SERVICE_UNAVAILABLE));
        let channel = RetryingChannel::new(selector, &config);

        let mut response = channel
            .execute(&endpoint(Method::POST), Request::default())
            .await
            .unwrap();
        response.close();

        let hits = factory.hits();
        assert_eq!(hits.len(), 2);
        assert_ne!(hits[0], hits[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_qos_propagates_when_configured() {
        let factory = StubFactory::new(StatusCode::TOO_MANY_REQUESTS);
        let config = ChannelConfig {
            server_qos: ServerQos::Propagate429And503ToCaller,
            ..config(3)
        }
        .with_uris(uris(2));
        let channel = RetryingChannel::new(selector(&factory, &config), &config);

        let error = channel
            .execute(&endpoint(Method::GET), Request::default())
            .await
            .unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(factory.hits().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honored_but_capped() {
        let factory = StubFactory::new(StatusCode::OK);
        let config = config(1).with_uris(uris(1));
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("60"));
        factory
            .stub(&config.uris[0])
            .push(Reply::Headers(StatusCode::TOO_MANY_REQUESTS, headers));
        let channel = RetryingChannel::new(selector(&factory, &config), &config);

        let started = Instant::now();
        let mut response = channel
            .execute(&endpoint(Method::GET), Request::default())
            .await
            .unwrap();
        response.close();
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_millis(1010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let stub = Arc::new(StubChannel::new(StatusCode::OK));
        stub.push(Reply::Connection);
        let channel = retrying(&stub, &config(4));

        let mut call = channel.execute(&endpoint(Method::GET), Request::default());
        assert!(futures::poll!(&mut call).is_pending());
        assert_eq!(stub.calls(), 1);

        assert!(call.cancel());
        assert!(call.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reaches_active_attempt() {
        let stub = Arc::new(StubChannel::new(StatusCode::OK));
        stub.push(Reply::Connection);
        stub.push(Reply::Pending);
        let channel = retrying(&stub, &config(4));

        let mut call = channel.execute(&endpoint(Method::GET), Request::default());
        assert!(futures::poll!(&mut call).is_pending());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(futures::poll!(&mut call).is_pending());
        assert_eq!(stub.calls(), 2);

        assert!(call.cancel());
        assert_eq!(stub.cancels(), 1);
    }
}
