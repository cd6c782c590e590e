//! Detection of responses that are dropped without being closed.
//!
//! Closing a [`Response`] is the caller's job; dropping one still frees its
//! resources, so this is a diagnostic aid rather than a safety mechanism.
//! A sampled subset of responses is registered in a tracking table. A
//! response that is closed leaves the table quietly, one that is dropped
//! unclosed is counted against its `(client, service, endpoint)`.

use dashmap::DashMap;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{CallFuture, Channel, Endpoint, Release, Request, Response};

/// The scope a leak is counted against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeakKey {
    /// Name of the client that made the call
    pub client: Arc<str>,
    /// Service that was called
    pub service: Arc<str>,
    /// Endpoint that was called
    pub endpoint: Arc<str>,
}

impl LeakKey {
    /// Build the key of a call to `endpoint`
    #[must_use]
    pub fn new(client: &str, endpoint: &Endpoint) -> Self {
        Self {
            client: client.into(),
            service: endpoint.service_name().into(),
            endpoint: endpoint.endpoint_name().into(),
        }
    }
}

impl fmt::Display for LeakKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.client, self.service, self.endpoint)
    }
}

/// Tracks a sample of responses and counts the ones that leak
#[derive(Debug)]
pub struct LeakDetector {
    sample_rate: f64,
    next_ticket: AtomicU64,
    tracked: DashMap<u64, LeakKey>,
    leaks: DashMap<LeakKey, u64>,
}

impl Default for LeakDetector {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl LeakDetector {
    /// Create a detector tracking `sample_rate` (between 0 and 1) of all
    /// responses. Rates that are not finite disable sampling.
    #[must_use]
    pub fn new(sample_rate: f64) -> Self {
        let sample_rate = if sample_rate.is_finite() {
            sample_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            sample_rate,
            next_ticket: AtomicU64::new(0),
            tracked: DashMap::new(),
            leaks: DashMap::new(),
        }
    }

    /// Register `response` for leak tracking if it is sampled
    pub fn wrap(self: &Arc<Self>, mut response: Response, key: LeakKey) -> Response {
        if !rand::rng().random_bool(self.sample_rate) {
            return response;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.tracked.insert(ticket, key);

        let detector = Arc::clone(self);
        response.on_release(move |how| {
            let Some((_, key)) = detector.tracked.remove(&ticket) else {
                return;
            };
            if how == Release::Dropped {
                *detector.leaks.entry(key.clone()).or_insert(0) += 1;
                log::warn!(
                    "Response from {key} was dropped without being closed; close responses you do not read to the end"
                );
            }
        });
        response
    }

    /// Number of leaks recorded for `key`
    #[must_use]
    pub fn leaks(&self, key: &LeakKey) -> u64 {
        self.leaks.get(key).map_or(0, |count| *count)
    }

    /// Number of leaks recorded across all keys
    #[must_use]
    pub fn total_leaks(&self) -> u64 {
        self.leaks.iter().map(|entry| *entry.value()).sum()
    }

    /// Number of responses currently tracked
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.tracked.len()
    }
}

/// Registers every response of the wrapped channel with a [`LeakDetector`]
pub struct LeakDetectedChannel {
    inner: Arc<dyn Channel>,
    detector: Arc<LeakDetector>,
    client: Arc<str>,
}

impl LeakDetectedChannel {
    /// Wrap `inner`, attributing leaks to `client`
    #[must_use]
    pub fn new(inner: Arc<dyn Channel>, detector: Arc<LeakDetector>, client: Arc<str>) -> Self {
        Self {
            inner,
            detector,
            client,
        }
    }
}

impl Channel for LeakDetectedChannel {
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response> {
        let key = LeakKey::new(&self.client, endpoint);
        let detector = Arc::clone(&self.detector);
        self.inner
            .execute(endpoint, request)
            .transform(move |response| Ok(detector.wrap(response, key)))
    }
}
