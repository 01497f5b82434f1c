//! kstream core - bounded, checkpointed shard consumption for partitioned streams
//!
//! This library provides:
//!
//! - A pull-based shard consumer that stops on shard close, an iteration
//!   deadline, or exhausted empty-fetch retries
//! - Durable per-shard checkpoints so iteration `n` resumes where `n - 1` stopped
//! - A record producer that retries through write throttling
//! - Shard discovery and serializable per-shard work units

mod aws;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod producer;
pub mod split;
pub mod stream;

// Re-export commonly used types
pub use checkpoint::{CheckpointKey, LeaseManager, ShardCheckpointer};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use consumer::{ConsumerStatus, ShardConsumer, ShardConsumerBuilder};
pub use error::{CheckpointError, StreamError};
pub use error::{Error, Result};
pub use producer::RecordProducer;
pub use split::ShardSplit;
pub use stream::{StreamRecord, StreamService};
