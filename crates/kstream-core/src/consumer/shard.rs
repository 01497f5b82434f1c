//! Shard consumer with fixed-interval empty-fetch retries.
//!
//! ## Fetch cycle
//!
//! Each cycle acquires a fresh iterator (trim horizon, or just after the last
//! record read) and fetches until it gets records or gives up:
//! - empty fetch with no next iterator: shard closed
//! - empty fetch with no retries left: exhausted
//! - empty fetch past the deadline: timed out
//! - otherwise sleep, re-check the deadline and fetch with the next iterator
//!
//! Records from a batch are handed out one per pull; the next cycle only
//! starts once the batch is drained.

use super::{ConsumerStatus, RetryConfig};
use crate::checkpoint::{CheckpointKey, LeaseManager, ShardCheckpointer};
use crate::clock::{to_chrono, Clock, SystemClock};
use crate::config::{Config, MAX_BATCH_SIZE};
use crate::error::StreamError;
use crate::metrics::StreamMetrics;
use crate::stream::{FetchedBatch, IteratorPosition, StreamRecord, StreamService};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Builder for creating a shard consumer.
pub struct ShardConsumerBuilder {
    service: Arc<dyn StreamService>,
    stream_name: String,
    shard_id: String,
    batch_size: usize,
    retry_config: RetryConfig,
    iteration_timeout: Duration,
    checkpointer: Option<ShardCheckpointer>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<StreamMetrics>>,
}

impl ShardConsumerBuilder {
    /// Create a new consumer builder with default batch size, retries and timeout.
    pub fn new(
        service: Arc<dyn StreamService>,
        stream_name: impl Into<String>,
        shard_id: impl Into<String>,
    ) -> Self {
        Self {
            service,
            stream_name: stream_name.into(),
            shard_id: shard_id.into(),
            batch_size: 1000,
            retry_config: RetryConfig::default(),
            iteration_timeout: Duration::from_secs(15 * 60),
            checkpointer: None,
            clock: Arc::new(SystemClock),
            metrics: None,
        }
    }

    /// Records requested per fetch, at most `MAX_BATCH_SIZE` (default: 1000).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set custom retry configuration.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Wall-clock budget for the run, counted from `build` (default: 15 minutes).
    pub fn with_iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = timeout;
        self
    }

    /// Enable checkpointing. The checkpointer must be keyed to this
    /// consumer's stream and shard, and should share its clock.
    pub fn with_checkpointer(mut self, checkpointer: ShardCheckpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Time source for the deadline and retry sleeps (default: [`SystemClock`]).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Count reads, fetches and stops in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<StreamMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the consumer.
    ///
    /// Fixes the iteration deadline and, when checkpointing, loads the
    /// position recorded by the previous iteration.
    pub async fn build(self) -> Result<ShardConsumer> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(Error::Config(format!(
                "batch size must be between 1 and {} (got {})",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }

        if let Some(checkpointer) = &self.checkpointer {
            let key = checkpointer.key();
            if key.stream != self.stream_name || key.shard_id != self.shard_id {
                return Err(Error::Config(format!(
                    "checkpoint key {} does not belong to {}/{}",
                    key, self.stream_name, self.shard_id
                )));
            }
        }

        let last_read = match &self.checkpointer {
            Some(checkpointer) => checkpointer.last_position().await,
            None => None,
        };

        let deadline = self.clock.now() + to_chrono(self.iteration_timeout);

        info!(
            stream = %self.stream_name,
            shard_id = %self.shard_id,
            batch_size = self.batch_size,
            max_retries = self.retry_config.max_attempts,
            deadline = %deadline,
            checkpointing = self.checkpointer.is_some(),
            "Shard consumer created"
        );

        Ok(ShardConsumer {
            service: self.service,
            stream_name: self.stream_name,
            shard_id: self.shard_id,
            batch_size: self.batch_size,
            retry_config: self.retry_config,
            deadline,
            checkpointer: self.checkpointer,
            clock: self.clock,
            metrics: self.metrics,
            status: ConsumerStatus::Start,
            buffer: VecDeque::new(),
            close_when_drained: false,
            last_read,
            records_read: 0,
        })
    }
}

/// Pull-based reader for one shard.
pub struct ShardConsumer {
    service: Arc<dyn StreamService>,
    stream_name: String,
    shard_id: String,
    batch_size: usize,
    retry_config: RetryConfig,
    /// Absolute, fixed at construction
    deadline: DateTime<Utc>,
    checkpointer: Option<ShardCheckpointer>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<StreamMetrics>>,
    status: ConsumerStatus,
    /// Undelivered records of the latest non-empty batch
    buffer: VecDeque<StreamRecord>,
    /// Latest batch had no next iterator
    close_when_drained: bool,
    /// Sequence number of the last record handed out, or the resume point
    last_read: Option<String>,
    records_read: u64,
}

impl ShardConsumer {
    /// Build a consumer for `shard_id` from the loaded configuration.
    ///
    /// A lease manager is required when checkpointing is enabled; the lease
    /// table is created on the way if it does not exist.
    pub async fn from_config(
        config: &Config,
        service: Arc<dyn StreamService>,
        shard_id: &str,
        lease_manager: Option<Arc<dyn LeaseManager>>,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<StreamMetrics>>,
    ) -> Result<Self> {
        let stream = &config.stream;
        let mut builder = ShardConsumerBuilder::new(service, &stream.name, shard_id)
            .with_batch_size(stream.batch_size)
            .with_retry_config(RetryConfig::from_stream_config(stream))
            .with_iteration_timeout(stream.iteration_timeout())
            .with_clock(clock.clone());

        if let Some(metrics) = &metrics {
            builder = builder.with_metrics(metrics.clone());
        }

        let checkpoint = &config.checkpoint;
        if checkpoint.enabled {
            let lease_manager = lease_manager.ok_or_else(|| {
                Error::Config("checkpointing is enabled but no lease manager was given".into())
            })?;
            let logical_name = checkpoint.logical_name.as_deref().ok_or_else(|| {
                Error::Config("checkpoint.logical_name is required when checkpointing".into())
            })?;

            let key = CheckpointKey::new(
                logical_name,
                &stream.name,
                shard_id,
                checkpoint.iteration_number,
            );
            let mut checkpointer =
                ShardCheckpointer::new(lease_manager, key, checkpoint.interval(), clock);
            if let Some(metrics) = metrics {
                checkpointer = checkpointer.with_metrics(metrics);
            }
            checkpointer
                .ensure_table(checkpoint.read_capacity, checkpoint.write_capacity)
                .await;

            builder = builder.with_checkpointer(checkpointer);
        }

        builder.build().await
    }

    /// Return the next record, or `None` once the consumer has stopped.
    ///
    /// Only iterator acquisition failures are returned as errors; they leave
    /// the consumer usable, so a later call starts a new fetch cycle.
    ///
    /// Cancel safe. The time-gated checkpoint written here covers the record
    /// returned by the previous call, so a dropped pull can neither skip a
    /// record nor persist one that was never returned.
    pub async fn next_record(&mut self) -> Result<Option<StreamRecord>> {
        if self.status.is_terminal() {
            return Ok(None);
        }

        if self.buffer.is_empty() && self.close_when_drained {
            self.finish(ConsumerStatus::Closed);
            return Ok(None);
        }

        if self.deadline_passed() {
            self.finish(ConsumerStatus::TimedOut);
            return Ok(None);
        }

        // Only positions already handed out are ever persisted
        if self.records_read > 0 {
            if let (Some(checkpointer), Some(last_read)) =
                (&mut self.checkpointer, &self.last_read)
            {
                checkpointer.checkpoint_if_due(last_read).await;
            }
        }

        if self.buffer.is_empty() {
            if !self.fetch_cycle().await? {
                return Ok(None);
            }
            if self.deadline_passed() {
                self.finish(ConsumerStatus::TimedOut);
                return Ok(None);
            }
        }

        // No await below this point: a dropped pull never loses a record
        let Some(record) = self.buffer.pop_front() else {
            return Ok(None);
        };

        self.last_read = Some(record.sequence_number.clone());
        self.records_read += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_read();
        }

        Ok(Some(record))
    }

    /// Pull up to `max` records. A short batch means the consumer stopped.
    pub async fn next_batch(&mut self, max: usize) -> Result<Vec<StreamRecord>> {
        let mut batch = Vec::with_capacity(max.min(self.batch_size));
        while batch.len() < max {
            match self.next_record().await? {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Finish the run, writing a final checkpoint if any record was read.
    pub async fn close(mut self) {
        if let (Some(checkpointer), Some(last_read)) = (&mut self.checkpointer, &self.last_read) {
            if self.records_read > 0 {
                checkpointer.checkpoint(last_read).await;
            }
        }

        info!(
            stream = %self.stream_name,
            shard_id = %self.shard_id,
            status = %self.status,
            records_read = self.records_read,
            "Shard consumer closed"
        );
    }

    /// Run one fetch cycle. Returns `true` if records were buffered.
    async fn fetch_cycle(&mut self) -> Result<bool> {
        let position = IteratorPosition::resume_from(self.last_read.as_deref());
        debug!(shard_id = %self.shard_id, position = %position, "Acquiring shard iterator");

        let mut iterator = self
            .service
            .get_shard_iterator(&self.stream_name, &self.shard_id, &position)
            .await?;
        self.status = ConsumerStatus::Iterating;

        let mut retries_left = self.retry_config.max_attempts;

        loop {
            let batch = match self.service.get_records(&iterator, self.batch_size).await {
                Ok(batch) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_fetch(batch.records.len());
                    }
                    batch
                }
                Err(StreamError::ThroughputExceeded) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_throttled_fetch();
                    }
                    debug!(shard_id = %self.shard_id, "Fetch throttled, treating as empty");
                    FetchedBatch::new(Vec::new(), Some(iterator.clone()))
                }
                Err(e) => {
                    warn!(shard_id = %self.shard_id, error = %e, "Fetch failed, stopping consumer");
                    self.finish(ConsumerStatus::Exhausted);
                    return Ok(false);
                }
            };

            if !batch.records.is_empty() {
                debug!(
                    shard_id = %self.shard_id,
                    records = batch.records.len(),
                    "Fetched batch"
                );
                self.close_when_drained = batch.is_shard_closed();
                self.buffer.extend(batch.records);
                return Ok(true);
            }

            let Some(next_iterator) = batch.next_iterator else {
                self.finish(ConsumerStatus::Closed);
                return Ok(false);
            };

            if retries_left == 0 {
                self.finish(ConsumerStatus::Exhausted);
                return Ok(false);
            }

            if self.deadline_passed() {
                self.finish(ConsumerStatus::TimedOut);
                return Ok(false);
            }

            self.status = ConsumerStatus::Retrying;
            debug!(
                shard_id = %self.shard_id,
                retries_left,
                interval_ms = self.retry_config.interval.as_millis() as u64,
                "Empty fetch, retrying"
            );
            self.clock.sleep(self.retry_config.interval).await;

            if self.deadline_passed() {
                self.finish(ConsumerStatus::TimedOut);
                return Ok(false);
            }

            self.status = ConsumerStatus::Iterating;
            iterator = next_iterator;
            retries_left -= 1;
        }
    }

    fn deadline_passed(&self) -> bool {
        self.clock.now() > self.deadline
    }

    fn finish(&mut self, status: ConsumerStatus) {
        self.status = status;
        if let (Some(metrics), Some(reason)) = (&self.metrics, status.stop_reason()) {
            metrics.record_stop(reason);
        }

        match status {
            ConsumerStatus::Closed => info!(shard_id = %self.shard_id, "Shard closed"),
            ConsumerStatus::TimedOut => {
                info!(shard_id = %self.shard_id, deadline = %self.deadline, "Iteration timed out")
            }
            _ => info!(
                shard_id = %self.shard_id,
                retries = self.retry_config.max_attempts,
                "No more records after retries"
            ),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ConsumerStatus {
        self.status
    }

    /// Whether the shard has been found closed.
    pub fn is_shard_closed(&self) -> bool {
        self.status == ConsumerStatus::Closed
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Records handed out during this run.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Sequence number the next fetch cycle resumes after.
    pub fn last_sequence_number(&self) -> Option<&str> {
        self.last_read.as_deref()
    }
}
