//! Channel configuration.
//!
//! All configuration types are plain values: they compare with `==`, so a
//! reload that produces an equal value can keep the channel built from the
//! previous one. Changes are made with the `with_*` transforms, which return
//! a new value instead of mutating in place.

use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use typed_builder::TypedBuilder;
use url::Url;

use crate::{ErrorKind, Result};

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_NUM_RETRIES: u32 = 4;

/// Default base delay of the exponential backoff
pub const DEFAULT_BACKOFF_SLOT_SIZE: Duration = Duration::from_millis(250);

/// Default upper bound for a single backoff delay
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Default time a host is avoided after it sent a QoS signal
pub const DEFAULT_FAILED_URL_COOLDOWN: Duration = Duration::from_millis(250);

/// How the node selector picks a URI for each call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeSelectionStrategy {
    /// Keep using one host until it fails, then move on
    #[default]
    PinUntilError,
    /// Rotate through hosts, preferring ones with spare concurrency
    RoundRobin,
    /// Rotate through hosts without any concurrency limiting
    UnlimitedRoundRobin,
}

/// Whether the client backs off on its own when hosts signal overload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientQos {
    /// Cool down overloaded hosts and limit concurrency per host
    #[default]
    Enabled,
    /// Neither cool down hosts nor limit concurrency
    DangerousDisableSympatheticClientQos,
}

/// What happens to 429 and 503 responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerQos {
    /// Retry them, usually against another host
    #[default]
    AutomaticRetry,
    /// Hand them straight to the caller
    #[serde(rename = "PROPAGATE_429_AND_503_TO_CALLER")]
    Propagate429And503ToCaller,
}

/// Whether timeouts count as retryable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryOnTimeout {
    /// Timeouts fail the call
    #[default]
    Disabled,
    /// Timeouts are retried. Slow servers then see even more load.
    DangerousEnableAtRiskOfRetryStorms,
}

/// Which requests may be retried after a 5xx response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyPolicy {
    /// Never retry 5xx responses
    Never,
    /// Retry 5xx responses of GET, HEAD, OPTIONS, PUT, DELETE and TRACE
    #[default]
    IdempotentMethods,
    /// Retry 5xx responses of every method
    Always,
}

impl IdempotencyPolicy {
    /// Returns `true` if a 5xx response to `method` may be retried
    #[must_use]
    pub fn permits(self, method: &Method) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::IdempotentMethods => matches!(
                *method,
                Method::GET
                    | Method::HEAD
                    | Method::OPTIONS
                    | Method::PUT
                    | Method::DELETE
                    | Method::TRACE
            ),
        }
    }
}

/// Parameters of the per-host adaptive concurrency limit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LimiterConfig {
    /// Concurrency allowed before any feedback arrived
    pub initial_limit: u32,
    /// Lower bound of the limit
    pub min_limit: u32,
    /// Upper bound of the limit
    pub max_limit: u32,
    /// Factor applied to the limit on overload
    pub backoff_ratio: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            initial_limit: 20,
            min_limit: 1,
            max_limit: 1000,
            backoff_ratio: 0.9,
        }
    }
}

/// Configuration of the channel to one service.
///
/// Use [`ChannelConfig::builder`] or deserialize it from any serde format:
///
/// ```
/// use switchyard_lib::{ChannelConfig, NodeSelectionStrategy};
///
/// let config: ChannelConfig = serde_json::from_str(r#"{
///     "uris": ["https://billing-1.example", "https://billing-2.example"],
///     "node-selection-strategy": "ROUND_ROBIN",
///     "failed-url-cooldown": "1s"
/// }"#).unwrap();
/// assert_eq!(config.node_selection_strategy, NodeSelectionStrategy::RoundRobin);
/// assert_eq!(config.max_num_retries, 4);
/// ```
#[derive(TypedBuilder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ChannelConfig {
    /// Base URIs of the service, in order
    pub uris: Vec<Url>,

    /// How a URI is picked for each call
    pub node_selection_strategy: NodeSelectionStrategy,

    /// Retries after the first attempt
    #[builder(default = DEFAULT_MAX_NUM_RETRIES)]
    pub max_num_retries: u32,

    /// Base delay of the exponential backoff
    #[builder(default = DEFAULT_BACKOFF_SLOT_SIZE)]
    #[serde(with = "humantime_serde")]
    pub backoff_slot_size: Duration,

    /// Upper bound of a single backoff delay
    #[builder(default = DEFAULT_MAX_BACKOFF)]
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Whether timeouts are retried
    pub retry_on_timeout: RetryOnTimeout,

    /// Client-side reaction to overload
    pub client_qos: ClientQos,

    /// Handling of 429 and 503 responses
    pub server_qos: ServerQos,

    /// How long a host is avoided after a QoS signal
    #[builder(default = DEFAULT_FAILED_URL_COOLDOWN)]
    #[serde(with = "humantime_serde")]
    pub failed_url_cooldown: Duration,

    /// Which methods may be retried after a 5xx
    pub idempotency: IdempotencyPolicy,

    /// Per-host concurrency limit
    pub limiter: LimiterConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ChannelConfig {
    /// Replace the URIs
    #[must_use]
    pub fn with_uris(self, uris: Vec<Url>) -> Self {
        Self { uris, ..self }
    }

    /// Replace the retry budget
    #[must_use]
    pub fn with_max_num_retries(self, max_num_retries: u32) -> Self {
        Self {
            max_num_retries,
            ..self
        }
    }

    /// Replace the node selection strategy
    #[must_use]
    pub fn with_strategy(self, node_selection_strategy: NodeSelectionStrategy) -> Self {
        Self {
            node_selection_strategy,
            ..self
        }
    }

    /// Returns `true` unless sympathetic client QoS is switched off
    #[must_use]
    pub fn sympathetic(&self) -> bool {
        self.client_qos == ClientQos::Enabled
    }
}

/// Configuration of all services a client talks to, keyed by service name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServicesConfig {
    /// Per-service channel configuration
    pub services: BTreeMap<String, ChannelConfig>,
}

impl ServicesConfig {
    /// Look up the configuration of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownService`] if `name` is not configured.
    pub fn service(&self, name: &str) -> Result<&ChannelConfig> {
        self.services
            .get(name)
            .ok_or_else(|| ErrorKind::UnknownService(name.to_string()))
    }

    /// Add or replace the configuration of one service
    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, config: ChannelConfig) -> Self {
        self.services.insert(name.into(), config);
        self
    }
}
