//! Durable per-shard checkpoints.
//!
//! Checkpoints live in a lease table keyed by
//! `<logical name>_<stream>_<shard>_<iteration>`. A run at iteration `n`
//! resumes from whatever the run at iteration `n - 1` last recorded.

mod checkpointer;
mod dynamodb;
mod memory;

pub use checkpointer::ShardCheckpointer;
pub use dynamodb::DynamoDbLeaseManager;
pub use memory::InMemoryLeaseManager;

use crate::error::CheckpointError;
use async_trait::async_trait;
use std::fmt;

/// Result type for lease table calls.
pub type LeaseResult<T> = std::result::Result<T, CheckpointError>;

/// A row of the lease table.
///
/// Only `checkpoint` is used for resuming; the counter and owner are kept
/// so the table stays compatible with other lease users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub lease_key: String,
    pub checkpoint: Option<String>,
    pub lease_counter: u64,
    pub lease_owner: Option<String>,
}

impl Lease {
    /// A new, unowned lease with no checkpoint.
    pub fn new(lease_key: impl Into<String>) -> Self {
        Self {
            lease_key: lease_key.into(),
            checkpoint: None,
            lease_counter: 0,
            lease_owner: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<String>) -> Self {
        self.checkpoint = Some(checkpoint.into());
        self
    }
}

/// Storage backend for leases.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Create the lease table unless it exists. Returns `true` if it was created.
    async fn create_lease_table_if_not_exists(
        &self,
        read_capacity: i64,
        write_capacity: i64,
    ) -> LeaseResult<bool>;

    /// Fetch the lease stored under `lease_key`.
    async fn get_lease(&self, lease_key: &str) -> LeaseResult<Option<Lease>>;

    /// Insert `lease` unless a lease with its key exists. Returns `true` if inserted.
    async fn create_lease_if_not_exists(&self, lease: &Lease) -> LeaseResult<bool>;

    /// Overwrite the checkpoint of an existing lease. Returns `false` if the
    /// lease does not exist.
    async fn update_lease(&self, lease: &Lease) -> LeaseResult<bool>;
}

/// Identity of one checkpoint lineage entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    pub logical_name: String,
    pub stream: String,
    pub shard_id: String,
    pub iteration: u32,
}

impl CheckpointKey {
    pub fn new(
        logical_name: impl Into<String>,
        stream: impl Into<String>,
        shard_id: impl Into<String>,
        iteration: u32,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            stream: stream.into(),
            shard_id: shard_id.into(),
            iteration,
        }
    }

    /// Key of the previous iteration, or `None` for iteration 0.
    pub fn previous(&self) -> Option<Self> {
        let iteration = self.iteration.checked_sub(1)?;
        Some(Self {
            iteration,
            ..self.clone()
        })
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.logical_name, self.stream, self.shard_id, self.iteration
        )
    }
}
