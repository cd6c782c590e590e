use serde::Serialize;
use serde::ser::SerializeStruct;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use crate::selector::HostKey;

/// Number of latency samples kept per host
const MAX_LATENCY_SAMPLES: usize = 256;

/// Statistics of every node of one selector, keyed by host
#[derive(Debug, Default, Serialize)]
pub struct HostStatsMap(BTreeMap<HostKey, HostStats>);

impl HostStatsMap {
    /// Statistics of one host
    #[must_use]
    pub fn get(&self, host: &HostKey) -> Option<&HostStats> {
        self.0.get(host)
    }

    /// Number of hosts
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no hosts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(HostKey, HostStats)> for HostStatsMap {
    fn from_iter<I: IntoIterator<Item = (HostKey, HostStats)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Record and report statistics for one backend node
#[derive(Debug, Clone, Default)]
pub struct HostStats {
    /// Total number of exchanges with this host, including failed ones
    pub total_requests: u64,
    /// Number of successful responses (2xx status)
    pub successful_requests: u64,
    /// Number of QoS responses (429 and 503)
    pub qos_signals: u64,
    /// Number of server error responses (5xx except 503)
    pub server_errors: u64,
    /// Number of client error responses (4xx except 429)
    pub client_errors: u64,
    /// Number of exchanges that failed without a response
    pub transport_failures: u64,
    /// Most recent response times
    pub request_times: VecDeque<Duration>,
    /// Status code counts
    pub status_codes: HashMap<u16, u64>,
}

impl HostStats {
    /// Record a response with status code and request duration
    pub fn record_response(&mut self, status_code: u16, request_time: Duration) {
        self.total_requests += 1;
        *self.status_codes.entry(status_code).or_insert(0) += 1;

        match status_code {
            200..=299 => self.successful_requests += 1,
            429 | 503 => self.qos_signals += 1,
            400..=499 => self.client_errors += 1,
            500..=599 => self.server_errors += 1,
            _ => {}
        }

        if self.request_times.len() == MAX_LATENCY_SAMPLES {
            self.request_times.pop_front();
        }
        self.request_times.push_back(request_time);
    }

    /// Record an exchange that produced no response
    pub const fn record_failure(&mut self) {
        self.total_requests += 1;
        self.transport_failures += 1;
    }

    /// Get median request time
    #[must_use]
    pub fn median_request_time(&self) -> Option<Duration> {
        if self.request_times.is_empty() {
            return None;
        }

        let mut times: Vec<_> = self.request_times.iter().copied().collect();
        times.sort();
        let mid = times.len() / 2;

        if times.len().is_multiple_of(2) {
            Some((times[mid - 1] + times[mid]) / 2)
        } else {
            Some(times[mid])
        }
    }

    /// Get error rate (percentage)
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        let errors =
            self.qos_signals + self.client_errors + self.server_errors + self.transport_failures;
        #[allow(clippy::cast_precision_loss)]
        let error_rate = errors as f64 / self.total_requests as f64;
        error_rate * 100.0
    }

    /// Get the current success rate (0.0 to 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let success_rate = self.successful_requests as f64 / self.total_requests as f64;
            success_rate
        }
    }
}

impl Serialize for HostStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let median_request_time_ms = self.median_request_time().map(|d| d.as_millis());

        let mut s = serializer.serialize_struct("HostStats", 10)?;
        s.serialize_field("total_requests", &self.total_requests)?;
        s.serialize_field("successful_requests", &self.successful_requests)?;
        s.serialize_field("success_rate", &self.success_rate())?;
        s.serialize_field("qos_signals", &self.qos_signals)?;
        s.serialize_field("client_errors", &self.client_errors)?;
        s.serialize_field("server_errors", &self.server_errors)?;
        s.serialize_field("transport_failures", &self.transport_failures)?;
        s.serialize_field("error_rate", &self.error_rate())?;
        s.serialize_field("median_request_time_ms", &median_request_time_ms)?;
        s.serialize_field("status_codes", &self.status_codes)?;
        s.end()
    }
}
