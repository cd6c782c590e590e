//! A raw transport backed by [`reqwest`].
//!
//! [`ReqwestChannelFactory`] owns a single `reqwest::Client`, so every node
//! it creates a [`ReqwestChannel`] for shares one connection pool. Each
//! channel performs exactly one HTTP exchange per call; retries, routing and
//! admission control happen in the layers above.

mod client;
mod error;

pub use client::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, ReqwestChannel,
    ReqwestChannelFactory, TransportConfig,
};
