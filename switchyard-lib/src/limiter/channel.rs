use std::sync::{Arc, Mutex, PoisonError};

use crate::limiter::{HostLimiter, Outcome, Permit};
use crate::{CallFuture, Channel, Endpoint, ErrorKind, Request, Response, Result};

impl Outcome {
    /// Classify the result of a call for the limiter
    #[must_use]
    pub fn of(result: &Result<Response>) -> Self {
        match result {
            Ok(response) => match response.status().as_u16() {
                429 | 503 => Self::Dropped,
                200..=499 => Self::Success,
                _ => Self::Ignore,
            },
            Err(ErrorKind::Timeout(_) | ErrorKind::Qos { .. }) => Self::Dropped,
            Err(_) => Self::Ignore,
        }
    }
}

type PermitSlot = Arc<Mutex<Option<Permit>>>;

fn take(slot: &PermitSlot) -> Option<Permit> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Runs each call of the wrapped channel under a [`HostLimiter`] permit.
///
/// Cancelling a call gives its permit back right away, before the call
/// future is polled or dropped.
pub struct ConcurrencyLimitedChannel {
    inner: Arc<dyn Channel>,
    limiter: Arc<HostLimiter>,
}

impl ConcurrencyLimitedChannel {
    /// Gate `inner` behind `limiter`
    #[must_use]
    pub fn new(inner: Arc<dyn Channel>, limiter: Arc<HostLimiter>) -> Self {
        Self { inner, limiter }
    }
}

impl Channel for ConcurrencyLimitedChannel {
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response> {
        let inner = Arc::clone(&self.inner);
        let limiter = Arc::clone(&self.limiter);
        let endpoint = endpoint.clone();
        let slot = PermitSlot::default();
        let held = Arc::clone(&slot);
        CallFuture::with_tracker(move |tracker| async move {
            let permit = limiter.acquire().await?;
            *held.lock().unwrap_or_else(PoisonError::into_inner) = Some(permit);
            if tracker.is_cancelled() {
                // The cancel hook ran before the permit was stored
                drop(take(&held));
                return Err(ErrorKind::Cancelled);
            }
            let call = inner.execute(&endpoint, request);
            tracker.follow(&call);
            let result = call.await;
            if let Some(permit) = take(&held) {
                permit.release(Outcome::of(&result));
            }
            result
        })
        .on_cancel(move || drop(take(&slot)))
    }
}
