//! Time-gated checkpoint writer for one shard.

use super::{CheckpointKey, Lease, LeaseManager, LeaseResult};
use crate::clock::{to_chrono, Clock};
use crate::metrics::StreamMetrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Best-effort checkpoint store for a single (logical name, stream, shard, iteration).
///
/// Every lease table failure is logged and swallowed: losing a checkpoint
/// only means a later run re-reads some records, so it must never stop
/// consumption.
pub struct ShardCheckpointer {
    lease_manager: Arc<dyn LeaseManager>,
    key: CheckpointKey,
    lease: Lease,
    interval: Duration,
    next_checkpoint_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<StreamMetrics>>,
}

impl ShardCheckpointer {
    /// Create a checkpointer. The first time-gated write becomes due one
    /// `interval` from now.
    pub fn new(
        lease_manager: Arc<dyn LeaseManager>,
        key: CheckpointKey,
        interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let lease = Lease::new(key.to_string());
        let next_checkpoint_at = clock.now() + to_chrono(interval);
        Self {
            lease_manager,
            key,
            lease,
            interval,
            next_checkpoint_at,
            clock,
            metrics: None,
        }
    }

    /// Count successful writes in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<StreamMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Key this checkpointer writes to.
    pub fn key(&self) -> &CheckpointKey {
        &self.key
    }

    /// When the next time-gated write becomes due.
    pub fn next_checkpoint_at(&self) -> DateTime<Utc> {
        self.next_checkpoint_at
    }

    /// Create the lease table if needed. Failures are logged only.
    pub async fn ensure_table(&self, read_capacity: i64, write_capacity: i64) {
        match self
            .lease_manager
            .create_lease_table_if_not_exists(read_capacity, write_capacity)
            .await
        {
            Ok(true) => info!(read_capacity, write_capacity, "Lease table created"),
            Ok(false) => debug!("Lease table already exists"),
            Err(e) => warn!(error = %e, "Could not create lease table, checkpointing may not work"),
        }
    }

    /// Sequence number recorded by the previous iteration for this shard.
    ///
    /// `None` for iteration 0, when no lease exists, or when the lookup fails.
    pub async fn last_position(&self) -> Option<String> {
        let position = match self.key.previous() {
            Some(previous) => {
                let lease_key = previous.to_string();
                match self.lease_manager.get_lease(&lease_key).await {
                    Ok(lease) => lease.and_then(|l| l.checkpoint),
                    Err(e) => {
                        warn!(lease_key = %lease_key, error = %e, "Checkpoint lookup failed");
                        None
                    }
                }
            }
            None => None,
        };

        match &position {
            Some(seq) => info!(
                shard_id = %self.key.shard_id,
                sequence_number = %seq,
                "Resuming from previous checkpoint"
            ),
            None => info!(
                shard_id = %self.key.shard_id,
                "Previous checkpoint not found, starting from beginning of shard"
            ),
        }

        position
    }

    /// Persist `sequence_number` now and restart the time gate.
    pub async fn checkpoint(&mut self, sequence_number: &str) {
        debug!(
            lease_key = %self.lease.lease_key,
            sequence_number = %sequence_number,
            "Checkpointing"
        );
        self.lease.checkpoint = Some(sequence_number.to_string());

        match self.write_lease().await {
            Ok(true) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_checkpoint();
                }
            }
            Ok(false) => info!(lease_key = %self.lease.lease_key, "Checkpointing unsuccessful"),
            Err(e) => warn!(lease_key = %self.lease.lease_key, error = %e, "Checkpoint write failed"),
        }

        self.next_checkpoint_at = self.clock.now() + to_chrono(self.interval);
    }

    /// Persist `sequence_number` only if the checkpoint interval has elapsed.
    /// Returns whether a write was attempted.
    pub async fn checkpoint_if_due(&mut self, sequence_number: &str) -> bool {
        if self.clock.now() >= self.next_checkpoint_at {
            self.checkpoint(sequence_number).await;
            true
        } else {
            false
        }
    }

    async fn write_lease(&self) -> LeaseResult<bool> {
        self.lease_manager
            .create_lease_if_not_exists(&self.lease)
            .await?;
        self.lease_manager.update_lease(&self.lease).await
    }
}
