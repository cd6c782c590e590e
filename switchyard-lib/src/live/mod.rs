//! Keeping channels in sync with a changing configuration.
//!
//! [`spawn_refreshing`] builds a value from the current configuration and
//! then polls the configuration source in the background, publishing a
//! rebuilt value whenever the configuration changes. Readers always get the
//! latest published value with a lock-free load.
//!
//! The poller only holds a weak reference to the published slot. Once every
//! [`Refreshable`] is gone it notices on its next tick and stops; there is
//! nothing to unsubscribe.

mod cache;

pub use cache::{CacheEntry, ChannelCache};

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

use crate::{CallFuture, Channel, Endpoint, Request, Response, Result, ServiceChannel};

/// A value that is replaced in the background when its configuration changes
pub struct Refreshable<T> {
    slot: Arc<ArcSwap<T>>,
}

impl<T> Refreshable<T> {
    /// The most recently published value
    #[must_use]
    pub fn current(&self) -> Arc<T> {
        self.slot.load_full()
    }
}

impl<T> Clone for Refreshable<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Refreshable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refreshable")
            .field("current", &self.slot.load())
            .finish()
    }
}

/// Build a value from `source()` and keep rebuilding it every `interval`
/// while the configuration keeps changing.
///
/// The first build runs before this function returns, so the result is
/// usable right away. Later builds run on the current tokio runtime and are
/// skipped while `source()` returns a value equal to the last one seen. A
/// failed rebuild is logged and the previous value stays published.
///
/// # Errors
///
/// Returns [`ErrorKind::NoRuntime`](crate::ErrorKind::NoRuntime) outside of
/// a tokio runtime, or the error of the first build.
pub fn spawn_refreshing<C, T, S, B>(
    mut source: S,
    mut build: B,
    interval: Duration,
) -> Result<Refreshable<T>>
where
    C: PartialEq + Send + 'static,
    T: Send + Sync + 'static,
    S: FnMut() -> C + Send + 'static,
    B: FnMut(&C) -> Result<Arc<T>> + Send + 'static,
{
    let runtime = Handle::try_current()?;
    let mut config = source();
    let slot = Arc::new(ArcSwap::new(build(&config)?));
    let published = Arc::downgrade(&slot);

    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(slot) = published.upgrade() else {
                log::debug!("Refreshable value is no longer referenced, stopping its poller");
                return;
            };
            let next = source();
            if next == config {
                continue;
            }
            match build(&next) {
                Ok(value) => slot.store(value),
                Err(e) => {
                    log::warn!("Failed to rebuild after a configuration change, keeping the previous value: {e}");
                }
            }
            config = next;
        }
    });

    Ok(Refreshable { slot })
}

/// A channel that always delegates to the most recently built
/// [`ServiceChannel`]
#[derive(Clone)]
pub struct LiveChannel {
    current: Refreshable<ServiceChannel>,
}

impl LiveChannel {
    /// Wrap a refreshing service channel
    #[must_use]
    pub const fn new(current: Refreshable<ServiceChannel>) -> Self {
        Self { current }
    }

    /// The channel calls currently go to
    #[must_use]
    pub fn current(&self) -> Arc<ServiceChannel> {
        self.current.current()
    }
}

impl Channel for LiveChannel {
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response> {
        self.current.current().execute(endpoint, request)
    }
}
