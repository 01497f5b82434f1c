//! Stream service abstraction.
//!
//! Everything the consumer, producer and catalog need from the stream
//! service goes through [`StreamService`], so the core can run against
//! Kinesis or against a scripted stand-in.

mod catalog;
mod kinesis;
mod registry;

pub use catalog::ShardCatalog;
pub use kinesis::KinesisStreamService;
pub use registry::StreamRegistry;

use crate::error::StreamError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Result type for stream service calls.
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Where a new shard iterator starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IteratorPosition {
    /// Oldest record still retained in the shard
    TrimHorizon,
    /// Immediately after the given sequence number
    AfterSequenceNumber(String),
}

impl IteratorPosition {
    /// Position for resuming after `last_read`, or the trim horizon when nothing was read.
    pub fn resume_from(last_read: Option<&str>) -> Self {
        match last_read {
            Some(seq) => IteratorPosition::AfterSequenceNumber(seq.to_string()),
            None => IteratorPosition::TrimHorizon,
        }
    }
}

impl fmt::Display for IteratorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IteratorPosition::TrimHorizon => write!(f, "TRIM_HORIZON"),
            IteratorPosition::AfterSequenceNumber(seq) => {
                write!(f, "AFTER_SEQUENCE_NUMBER({})", seq)
            }
        }
    }
}

/// A single record read from a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Partition key the record was written with
    pub partition_key: String,

    /// Opaque payload
    pub data: Bytes,

    /// Position of the record within its shard
    pub sequence_number: String,
}

impl StreamRecord {
    pub fn new(
        partition_key: impl Into<String>,
        data: impl Into<Bytes>,
        sequence_number: impl Into<String>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            data: data.into(),
            sequence_number: sequence_number.into(),
        }
    }

    /// Payload as UTF-8, if it is valid.
    pub fn data_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Result of one fetch against a shard iterator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedBatch {
    /// Records in shard order; may be empty
    pub records: Vec<StreamRecord>,

    /// Iterator for the next fetch; `None` means the shard is closed
    pub next_iterator: Option<String>,
}

impl FetchedBatch {
    pub fn new(records: Vec<StreamRecord>, next_iterator: Option<String>) -> Self {
        Self {
            records,
            next_iterator,
        }
    }

    /// The shard has been closed and no record will ever follow this batch.
    pub fn is_shard_closed(&self) -> bool {
        self.next_iterator.is_none()
    }
}

/// Where a submitted record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordOutput {
    pub shard_id: String,
    pub sequence_number: String,
}

/// Lifecycle state of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Creating,
    Deleting,
    Active,
    Updating,
    Unknown(String),
}

impl StreamStatus {
    /// Shards can only be listed and read in ACTIVE or UPDATING.
    pub fn is_readable(&self) -> bool {
        matches!(self, StreamStatus::Active | StreamStatus::Updating)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Creating => write!(f, "CREATING"),
            StreamStatus::Deleting => write!(f, "DELETING"),
            StreamStatus::Active => write!(f, "ACTIVE"),
            StreamStatus::Updating => write!(f, "UPDATING"),
            StreamStatus::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Operations the core needs from a partitioned stream service.
#[async_trait]
pub trait StreamService: Send + Sync {
    /// Current lifecycle state of `stream`.
    async fn stream_status(&self, stream: &str) -> StreamResult<StreamStatus>;

    /// Ids of every shard currently in `stream`.
    async fn list_shard_ids(&self, stream: &str) -> StreamResult<Vec<String>>;

    /// Obtain a fresh iterator for `shard_id` at `position`.
    async fn get_shard_iterator(
        &self,
        stream: &str,
        shard_id: &str,
        position: &IteratorPosition,
    ) -> StreamResult<String>;

    /// Fetch up to `limit` records using `iterator`.
    async fn get_records(&self, iterator: &str, limit: usize) -> StreamResult<FetchedBatch>;

    /// Submit one record.
    ///
    /// Admission-control rejections must surface as
    /// [`StreamError::ThroughputExceeded`].
    async fn put_record(
        &self,
        stream: &str,
        partition_key: &str,
        data: Bytes,
    ) -> StreamResult<PutRecordOutput>;
}
