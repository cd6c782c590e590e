use http::header::CONTENT_TYPE;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use crate::blocking::CallingThreadExecutor;
use crate::config::{ChannelConfig, NodeSelectionStrategy, ServicesConfig};
use crate::leak::{LeakDetectedChannel, LeakDetector};
use crate::limiter::{ConcurrencyLimitedChannel, HostLimiter};
use crate::live::{ChannelCache, LiveChannel, spawn_refreshing};
use crate::retry::RetryingChannel;
use crate::selector::{HostKey, HostStatsMap, Node, NodeSelectingChannel};
use crate::{
    CallFuture, Channel, ChannelFactory, Endpoint, ErrorKind, Request, Response, Result,
    SerializableError,
};

/// Shared context every channel of a client is built from.
///
/// Cloning is cheap; clones share the leak detector and the transport
/// factory, so pooled connections are shared across all services.
#[derive(Clone)]
pub struct Resources {
    client: Arc<str>,
    leak_detector: Arc<LeakDetector>,
    factory: Arc<dyn ChannelFactory>,
    runtime: Option<Handle>,
}

impl Resources {
    /// Create the resources of client `client`, creating transports with
    /// `factory`. The current tokio runtime, if any, is used for blocking
    /// calls.
    #[must_use]
    pub fn new(client: &str, factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            client: client.into(),
            leak_detector: Arc::new(LeakDetector::default()),
            factory,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Use `leak_detector` instead of the default one
    #[must_use]
    pub fn with_leak_detector(self, leak_detector: Arc<LeakDetector>) -> Self {
        Self {
            leak_detector,
            ..self
        }
    }

    /// Serve blocking calls with `runtime`
    #[must_use]
    pub fn with_runtime(self, runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
            ..self
        }
    }

    /// Name of the client, used to attribute leaks
    #[must_use]
    pub fn client(&self) -> &str {
        &self.client
    }

    /// The leak detector all channels report to
    #[must_use]
    pub const fn leak_detector(&self) -> &Arc<LeakDetector> {
        &self.leak_detector
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("client", &self.client)
            .field("leak_detector", &self.leak_detector)
            .finish_non_exhaustive()
    }
}

/// The fully composed channel to one service.
///
/// Calls pass, from the outside in, through error decoding, retries, node
/// selection, per-host admission control and leak detection before they
/// reach the transport of the chosen node.
pub struct ServiceChannel {
    service: Arc<str>,
    selector: Arc<NodeSelectingChannel>,
    retrying: RetryingChannel,
    runtime: Option<Handle>,
}

impl ServiceChannel {
    /// Build the channel for `service`.
    ///
    /// A service without URIs is valid; its calls fail with
    /// [`ErrorKind::NoUris`].
    ///
    /// # Errors
    ///
    /// Fails if a URI has no host or the transport factory rejects it.
    pub fn new(service: &str, config: &ChannelConfig, resources: &Resources) -> Result<Self> {
        let limited = config.sympathetic()
            && config.node_selection_strategy != NodeSelectionStrategy::UnlimitedRoundRobin;

        let nodes = config
            .uris
            .iter()
            .map(|uri| {
                let transport = resources.factory.create(uri)?;
                let channel: Arc<dyn Channel> = Arc::new(LeakDetectedChannel::new(
                    transport,
                    Arc::clone(&resources.leak_detector),
                    Arc::clone(&resources.client),
                ));
                if !limited {
                    return Node::new(uri.clone(), channel, None);
                }
                let limiter = Arc::new(HostLimiter::new(HostKey::try_from(uri)?, &config.limiter));
                let channel = Arc::new(ConcurrencyLimitedChannel::new(channel, Arc::clone(&limiter)));
                Node::new(uri.clone(), channel, Some(limiter))
            })
            .collect::<Result<Vec<_>>>()?;

        let selector = Arc::new(NodeSelectingChannel::new(service, config, nodes));
        log::debug!(
            "[{service}] Built channel over {} node(s) with {:?}",
            config.uris.len(),
            config.node_selection_strategy
        );
        Ok(Self {
            service: service.into(),
            retrying: RetryingChannel::new(selector.clone(), config),
            selector,
            runtime: resources.runtime.clone(),
        })
    }

    /// Name of the service
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The node selector of this channel
    #[must_use]
    pub fn selector(&self) -> &NodeSelectingChannel {
        &self.selector
    }

    /// Per-host statistics
    #[must_use]
    pub fn host_stats(&self) -> HostStatsMap {
        self.selector.host_stats()
    }

    /// Execute a call and block the current thread until it completes.
    ///
    /// Must not be called from within an async context.
    ///
    /// # Errors
    ///
    /// Returns the error of the call, or [`ErrorKind::NoRuntime`] if no
    /// runtime was configured and none is current.
    pub fn execute_blocking(&self, endpoint: &Endpoint, request: Request) -> Result<Response> {
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current()?,
        };
        CallingThreadExecutor::new(runtime).run_until(self.execute(endpoint, request))
    }
}

impl Channel for ServiceChannel {
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response> {
        self.retrying
            .execute(endpoint, request)
            .transform_async(|response| {
                if response.status().is_success() {
                    CallFuture::ready(Ok(response))
                } else {
                    CallFuture::new(decode_error(response))
                }
            })
    }
}

impl fmt::Debug for ServiceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceChannel")
            .field("service", &self.service)
            .field("hosts", &self.selector.hosts())
            .finish_non_exhaustive()
    }
}

/// Turn a non-2xx response into a [`ErrorKind::Remote`], closing it
async fn decode_error(response: Response) -> Result<Response> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    let body = response.bytes().await?;
    let error = if is_json {
        serde_json::from_slice::<SerializableError>(&body).ok()
    } else {
        None
    };
    Err(ErrorKind::Remote { status, error })
}

struct ClientsInner {
    resources: Resources,
    cache: ChannelCache<String, ChannelConfig, ServiceChannel>,
}

/// Hands out service channels, reusing them while their configuration
/// stays the same.
#[derive(Clone)]
pub struct Clients {
    inner: Arc<ClientsInner>,
}

impl Clients {
    /// Create channels from `resources`
    #[must_use]
    pub fn new(resources: Resources) -> Self {
        Self {
            inner: Arc::new(ClientsInner {
                resources,
                cache: ChannelCache::new(),
            }),
        }
    }

    /// The resources channels are built from
    #[must_use]
    pub fn resources(&self) -> &Resources {
        &self.inner.resources
    }

    /// The channel to `service` as configured in `config`.
    ///
    /// Equal configurations share one channel, including its routing and
    /// limiter state.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownService`] if `config` has no entry for
    /// `service`, or the error of [`ServiceChannel::new`].
    pub fn channel(&self, service: &str, config: &ServicesConfig) -> Result<Arc<ServiceChannel>> {
        let channel_config = config.service(service)?;
        self.inner
            .cache
            .get_or_build(&service.to_string(), channel_config, |config| {
                ServiceChannel::new(service, config, &self.inner.resources)
            })
    }

    /// A channel to `service` that follows changes of `source`, which is
    /// polled every `interval`.
    ///
    /// # Errors
    ///
    /// Fails outside of a tokio runtime, or if the channel cannot be built
    /// from the current configuration.
    pub fn live_channel<S>(&self, service: &str, source: S, interval: Duration) -> Result<LiveChannel>
    where
        S: FnMut() -> ServicesConfig + Send + 'static,
    {
        let clients = self.clone();
        let service = service.to_string();
        let current = spawn_refreshing(
            source,
            move |config: &ServicesConfig| clients.channel(&service, config),
            interval,
        )?;
        Ok(LiveChannel::new(current))
    }
}

impl fmt::Debug for Clients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clients")
            .field("resources", &self.inner.resources)
            .field("cache", &self.inner.cache)
            .finish()
    }
}
