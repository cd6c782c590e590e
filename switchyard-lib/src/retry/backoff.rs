use rand::Rng;
use std::time::Duration;

/// Exponential backoff with additive jitter.
///
/// The delay before retry `attempt` (starting at 0) is
/// `min(cap, slot * 2^attempt + jitter)` with `jitter` drawn uniformly from
/// `[0, slot]`. Since the exponential part at least doubles while the jitter
/// never exceeds one slot, delays never shrink from one attempt to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    slot: Duration,
    cap: Duration,
}

impl Backoff {
    /// Create a backoff with base delay `slot`, never waiting longer than `cap`
    #[must_use]
    pub const fn new(slot: Duration, cap: Duration) -> Self {
        Self { slot, cap }
    }

    /// Upper bound of every delay
    #[must_use]
    pub const fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before retry number `attempt`
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exponential = self.slot.saturating_mul(factor);
        let slot_nanos = u64::try_from(self.slot.as_nanos()).unwrap_or(u64::MAX);
        let jitter = Duration::from_nanos(rand::rng().random_range(0..=slot_nanos));
        exponential.saturating_add(jitter).min(self.cap)
    }
}
