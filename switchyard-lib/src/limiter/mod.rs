//! Per-host admission control.
//!
//! Each host gets a [`HostLimiter`] whose limit adapts to the host's
//! behavior ([`AimdLimit`]): it creeps up while the host keeps up with the
//! load and drops sharply when the host signals overload.

mod aimd;
mod channel;
mod host;

pub use aimd::{AimdLimit, Outcome};
pub use channel::ConcurrencyLimitedChannel;
pub use host::{HostLimiter, Permit};
