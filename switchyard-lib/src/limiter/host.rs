use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::config::LimiterConfig;
use crate::limiter::{AimdLimit, Outcome};
use crate::selector::HostKey;
use crate::{ErrorKind, Result};

#[derive(Debug)]
struct State {
    in_flight: usize,
    limit: AimdLimit,
    waiters: VecDeque<oneshot::Sender<Permit>>,
}

/// Admission control for one host.
///
/// Callers [`acquire`](HostLimiter::acquire) a [`Permit`] before talking to
/// the host and release it once the call is over. At most
/// `floor(limit)` permits are out at any time; callers beyond that wait in
/// FIFO order and each release hands the freed slot to exactly one of them.
#[derive(Debug)]
pub struct HostLimiter {
    host: HostKey,
    state: Mutex<State>,
}

impl HostLimiter {
    /// Create a limiter for `host`
    #[must_use]
    pub fn new(host: HostKey, config: &LimiterConfig) -> Self {
        Self {
            host,
            state: Mutex::new(State {
                in_flight: 0,
                limit: AimdLimit::new(config),
                waiters: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a permit.
    ///
    /// Dropping the returned future gives up the place in the queue.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Cancelled`] if the queued request was discarded
    /// without being served.
    pub async fn acquire(self: &Arc<Self>) -> Result<Permit> {
        let receiver = {
            let mut state = self.lock();
            if state.waiters.is_empty() && state.in_flight < state.limit.capacity() {
                state.in_flight += 1;
                return Ok(Permit::new(Arc::clone(self)));
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            log::trace!(
                "[{}] Waiting for a permit ({} queued)",
                self.host,
                state.waiters.len()
            );
            receiver
        };
        receiver.await.map_err(|_| ErrorKind::Cancelled)
    }

    fn release(self: &Arc<Self>, outcome: Outcome) {
        let mut state = self.lock();
        let in_flight = state.in_flight;
        let before = state.limit.capacity();
        state.limit.update(outcome, in_flight);
        state.in_flight = in_flight.saturating_sub(1);
        if state.limit.capacity() != before {
            log::debug!(
                "[{}] Concurrency limit changed to {:.2} after {outcome:?}",
                self.host,
                state.limit.limit()
            );
        }
        self.hand_off(&mut state);
    }

    /// Pass free slots to queued callers, skipping those that gave up
    fn hand_off(self: &Arc<Self>, state: &mut State) {
        while state.in_flight < state.limit.capacity() {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.in_flight += 1;
            if let Err(mut permit) = waiter.send(Permit::new(Arc::clone(self))) {
                permit.disarm();
                state.in_flight -= 1;
            }
        }
    }

    /// The host this limiter guards
    #[must_use]
    pub const fn host(&self) -> &HostKey {
        &self.host
    }

    /// Number of permits currently held
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// The current limit
    #[must_use]
    pub fn limit(&self) -> f64 {
        self.lock().limit.limit()
    }

    /// Number of queued callers, including ones that gave up but were not
    /// yet skipped
    #[must_use]
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Returns `true` if a permit would be granted without waiting
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        let state = self.lock();
        state.waiters.is_empty() && state.in_flight < state.limit.capacity()
    }
}

/// The right to run one call against a host.
///
/// Dropping a permit releases it with [`Outcome::Ignore`].
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    limiter: Option<Arc<HostLimiter>>,
}

impl Permit {
    const fn new(limiter: Arc<HostLimiter>) -> Self {
        Self {
            limiter: Some(limiter),
        }
    }

    fn disarm(&mut self) {
        self.limiter = None;
    }

    /// Give the permit back, reporting how the call went
    pub fn release(mut self, outcome: Outcome) {
        if let Some(limiter) = self.limiter.take() {
            limiter.release(outcome);
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(limiter) = self.limiter.take() {
            limiter.release(Outcome::Ignore);
        }
    }
}
