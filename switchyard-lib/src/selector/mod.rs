//! Picking a backend node for each call.
//!
//! A [`NodeSelectingChannel`] owns one [`Node`] per configured URI and the
//! routing state shared by all calls to its service: the pinned node, the
//! per-node cooldowns and failure scores.
//!
//! A 429 or 503 answer puts the node that sent it into cooldown. The call
//! itself still fails with [`ErrorKind::Qos`]; whether it is retried is up
//! to the retry layer above. Cooling nodes are skipped until their cooldown
//! ends, unless every node is cooling, in which case the one that recovers
//! first is used.

mod headers;
mod host;
mod stats;

pub use host::HostKey;
pub use stats::{HostStats, HostStatsMap};

use rand::Rng;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::config::{ChannelConfig, NodeSelectionStrategy};
use crate::limiter::HostLimiter;
use crate::{CallFuture, Channel, Endpoint, ErrorKind, Request, Response, Result};

/// One backend node: a base URI and the channel that reaches it
pub struct Node {
    host: HostKey,
    uri: Url,
    channel: Arc<dyn Channel>,
    limiter: Option<Arc<HostLimiter>>,
    /// Nanoseconds since the selector epoch; 0 means "not cooling"
    cooldown_until: AtomicU64,
    failures: AtomicU32,
    stats: Mutex<HostStats>,
}

impl Node {
    /// Create a node. `limiter` must be the limiter `channel` runs under,
    /// if any; the selector consults it to find nodes with spare capacity.
    ///
    /// # Errors
    ///
    /// Fails if `uri` has no host.
    pub fn new(
        uri: Url,
        channel: Arc<dyn Channel>,
        limiter: Option<Arc<HostLimiter>>,
    ) -> Result<Self> {
        Ok(Self {
            host: HostKey::try_from(&uri)?,
            uri,
            channel,
            limiter,
            cooldown_until: AtomicU64::new(0),
            failures: AtomicU32::new(0),
            stats: Mutex::new(HostStats::default()),
        })
    }

    /// Host of this node
    #[must_use]
    pub const fn host(&self) -> &HostKey {
        &self.host
    }

    /// Base URI of this node
    #[must_use]
    pub const fn uri(&self) -> &Url {
        &self.uri
    }

    fn cooling(&self, now: u64) -> bool {
        self.cooldown_until.load(Ordering::Acquire) > now
    }

    fn has_capacity(&self) -> bool {
        self.limiter.as_ref().is_none_or(|l| l.has_capacity())
    }

    fn record(&self, update: impl FnOnce(&mut HostStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Routing state shared by every call of one service
struct RoutingState {
    service: Arc<str>,
    strategy: NodeSelectionStrategy,
    failed_url_cooldown: Duration,
    sympathetic: bool,
    epoch: Instant,
    nodes: Vec<Node>,
    pin: AtomicUsize,
    rotation: AtomicUsize,
}

impl RoutingState {
    fn now(&self) -> u64 {
        #[allow(clippy::cast_possible_truncation)]
        let nanos = self.epoch.elapsed().as_nanos() as u64;
        nanos
    }

    fn select(&self) -> usize {
        let now = self.now();
        let n = self.nodes.len();
        match self.strategy {
            NodeSelectionStrategy::PinUntilError => {
                let pinned = self.pin.load(Ordering::Acquire);
                if self.nodes[pinned].cooling(now) {
                    self.repin(pinned, now)
                } else {
                    pinned
                }
            }
            NodeSelectionStrategy::RoundRobin => {
                let start = self.rotation.fetch_add(1, Ordering::Relaxed) % n;
                self.rotation_from(start)
                    .find(|&i| !self.nodes[i].cooling(now) && self.nodes[i].has_capacity())
                    .or_else(|| self.rotation_from(start).find(|&i| !self.nodes[i].cooling(now)))
                    .unwrap_or_else(|| self.earliest_recovery())
            }
            NodeSelectionStrategy::UnlimitedRoundRobin => {
                let start = self.rotation.fetch_add(1, Ordering::Relaxed) % n;
                self.rotation_from(start)
                    .find(|&i| !self.nodes[i].cooling(now))
                    .unwrap_or_else(|| self.earliest_recovery())
            }
        }
    }

    fn rotation_from(&self, start: usize) -> impl Iterator<Item = usize> {
        let n = self.nodes.len();
        (0..n).map(move |offset| (start + offset) % n)
    }

    fn earliest_recovery(&self) -> usize {
        (0..self.nodes.len())
            .min_by_key(|&i| self.nodes[i].cooldown_until.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Move the pin away from `failed`. Concurrent callers that saw the same
    /// pinned node move it once; the losers adopt the winner's choice.
    fn repin(&self, failed: usize, now: u64) -> usize {
        let n = self.nodes.len();
        let candidate = self
            .rotation_from(failed + 1)
            .filter(|&i| !self.nodes[i].cooling(now))
            .min_by_key(|&i| self.nodes[i].failures.load(Ordering::Acquire))
            .unwrap_or_else(|| self.earliest_recovery());
        match self
            .pin
            .compare_exchange(failed, candidate, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if candidate != failed && n > 1 {
                    log::debug!(
                        "[{}] Pinning to {} after failure of {}",
                        self.service,
                        self.nodes[candidate].host,
                        self.nodes[failed].host
                    );
                }
                candidate
            }
            Err(current) => current,
        }
    }

    fn node_failed(&self, index: usize) {
        self.nodes[index].failures.fetch_add(1, Ordering::AcqRel);
        if self.strategy == NodeSelectionStrategy::PinUntilError
            && self.pin.load(Ordering::Acquire) == index
        {
            self.repin(index, self.now());
        }
    }

    fn observe(&self, index: usize, result: Result<Response>, started: Instant) -> Result<Response> {
        let node = &self.nodes[index];
        let mut response = match result {
            Ok(response) => response,
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                node.record(HostStats::record_failure);
                if matches!(error, ErrorKind::Connection(_) | ErrorKind::Timeout(_)) {
                    self.node_failed(index);
                }
                return Err(error);
            }
        };

        let status = response.status();
        node.record(|stats| stats.record_response(status.as_u16(), started.elapsed()));
        match status.as_u16() {
            429 | 503 => {
                if self.sympathetic {
                    let until = self.now().saturating_add(
                        u64::try_from(self.failed_url_cooldown.as_nanos()).unwrap_or(u64::MAX),
                    );
                    node.cooldown_until.fetch_max(until, Ordering::AcqRel);
                    log::debug!(
                        "[{}] {} responded with {status}, cooling down for {:?}",
                        self.service,
                        node.host,
                        self.failed_url_cooldown
                    );
                }
                self.node_failed(index);
                let retry_after = headers::retry_after(response.headers());
                response.close();
                Err(ErrorKind::Qos {
                    status,
                    host: node.host.clone(),
                    retry_after,
                })
            }
            500..=599 => {
                self.node_failed(index);
                Ok(response)
            }
            _ => {
                node.failures.store(0, Ordering::Release);
                Ok(response)
            }
        }
    }
}

/// Routes each call to one of several nodes
pub struct NodeSelectingChannel {
    state: Arc<RoutingState>,
}

impl NodeSelectingChannel {
    /// Create a selector for `service` over `nodes`, in configuration order
    #[must_use]
    pub fn new(service: &str, config: &ChannelConfig, nodes: Vec<Node>) -> Self {
        let pin = if nodes.is_empty() {
            0
        } else {
            rand::rng().random_range(0..nodes.len())
        };
        Self {
            state: Arc::new(RoutingState {
                service: service.into(),
                strategy: config.node_selection_strategy,
                failed_url_cooldown: config.failed_url_cooldown,
                sympathetic: config.sympathetic(),
                epoch: Instant::now(),
                nodes,
                pin: AtomicUsize::new(pin),
                rotation: AtomicUsize::new(0),
            }),
        }
    }

    /// Hosts of all nodes, in configuration order
    #[must_use]
    pub fn hosts(&self) -> Vec<HostKey> {
        self.state.nodes.iter().map(|n| n.host.clone()).collect()
    }

    /// The node the next call goes to under `PIN_UNTIL_ERROR`
    #[must_use]
    pub fn pinned(&self) -> Option<&HostKey> {
        let index = self.state.pin.load(Ordering::Acquire);
        self.state.nodes.get(index).map(|n| &n.host)
    }

    /// Returns `true` if the node for `host` is in cooldown
    #[must_use]
    pub fn is_cooling(&self, host: &HostKey) -> bool {
        let now = self.state.now();
        self.state
            .nodes
            .iter()
            .any(|n| &n.host == host && n.cooling(now))
    }

    /// Statistics of every node
    #[must_use]
    pub fn host_stats(&self) -> HostStatsMap {
        self.state
            .nodes
            .iter()
            .map(|n| {
                let stats = n.stats.lock().unwrap_or_else(PoisonError::into_inner);
                (n.host.clone(), stats.clone())
            })
            .collect()
    }
}

impl Channel for NodeSelectingChannel {
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response> {
        if self.state.nodes.is_empty() {
            return CallFuture::failed(ErrorKind::NoUris(self.state.service.to_string()));
        }
        let index = self.state.select();
        log::trace!(
            "[{}] {endpoint} routed to {}",
            self.state.service,
            self.state.nodes[index].host
        );

        let state = Arc::clone(&self.state);
        let started = Instant::now();
        let call = state.nodes[index].channel.execute(endpoint, request);
        CallFuture::with_tracker(move |tracker| {
            tracker.follow(&call);
            async move {
                let result = call.await;
                state.observe(index, result, started)
            }
        })
    }
}
