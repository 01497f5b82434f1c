//! Bounded, resumable reader for a single shard.
//!
//! A [`ShardConsumer`] pulls records one at a time until the shard is
//! closed, the iteration deadline passes, or empty-fetch retries run out.

mod shard;

pub use shard::{ShardConsumer, ShardConsumerBuilder};

use crate::config::StreamConfig;
use crate::metrics::StopReason;
use std::fmt;
use std::time::Duration;

/// Empty-fetch retry behavior.
///
/// Retries are a fixed count with a fixed sleep in between; the budget is
/// refilled at the start of every fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Empty fetches tolerated after the first one (default: 3)
    pub max_attempts: u32,
    /// Sleep before each retry (default: 1s)
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Retry settings from the stream section of the configuration.
    pub fn from_stream_config(config: &StreamConfig) -> Self {
        Self::new(config.retry_max_attempts, config.retry_interval())
    }
}

/// Lifecycle of a [`ShardConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerStatus {
    /// Built, nothing fetched yet
    Start,
    /// Holding an iterator and fetching
    Iterating,
    /// Sleeping between empty fetches
    Retrying,
    /// Shard closed; no record will ever follow
    Closed,
    /// Iteration deadline passed
    TimedOut,
    /// Retries ran out, or a fetch failed
    Exhausted,
}

impl ConsumerStatus {
    /// Terminal states never return more records.
    pub fn is_terminal(&self) -> bool {
        self.stop_reason().is_some()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            ConsumerStatus::Closed => Some(StopReason::Closed),
            ConsumerStatus::TimedOut => Some(StopReason::TimedOut),
            ConsumerStatus::Exhausted => Some(StopReason::Exhausted),
            ConsumerStatus::Start | ConsumerStatus::Iterating | ConsumerStatus::Retrying => None,
        }
    }
}

impl fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsumerStatus::Start => "START",
            ConsumerStatus::Iterating => "ITERATING",
            ConsumerStatus::Retrying => "RETRYING",
            ConsumerStatus::Closed => "CLOSED",
            ConsumerStatus::TimedOut => "TIMED_OUT",
            ConsumerStatus::Exhausted => "EXHAUSTED",
        };
        f.write_str(s)
    }
}
