//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use kstream_core::checkpoint::{InMemoryLeaseManager, Lease, LeaseManager, LeaseResult};
use kstream_core::clock::{Clock, ManualClock};
use kstream_core::error::StreamError;
use kstream_core::stream::{
    FetchedBatch, IteratorPosition, PutRecordOutput, StreamRecord, StreamResult, StreamService,
    StreamStatus,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A call observed by [`ScriptedStream`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Iterator {
        shard_id: String,
        position: IteratorPosition,
    },
    Fetch {
        iterator: String,
        limit: usize,
    },
    Put {
        partition_key: String,
        data: Bytes,
    },
}

/// In-memory stream service that replays scripted responses.
///
/// Unscripted iterator requests return `iterator-<n>`, unscripted fetches
/// return an empty batch with a next iterator, and unscripted puts succeed.
pub struct ScriptedStream {
    status: StreamStatus,
    shards: Vec<String>,
    iterators: Mutex<VecDeque<StreamResult<String>>>,
    fetches: Mutex<VecDeque<StreamResult<FetchedBatch>>>,
    puts: Mutex<VecDeque<StreamResult<PutRecordOutput>>>,
    calls: Mutex<Vec<Call>>,
    fetch_delay: Option<(Arc<ManualClock>, Duration)>,
}

impl Default for ScriptedStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self {
            status: StreamStatus::Active,
            shards: vec!["shardId-000000000000".to_string()],
            iterators: Mutex::new(VecDeque::new()),
            fetches: Mutex::new(VecDeque::new()),
            puts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            fetch_delay: None,
        }
    }

    /// Make every fetch take `delay` on `clock`.
    pub fn with_fetch_delay(mut self, clock: Arc<ManualClock>, delay: Duration) -> Self {
        self.fetch_delay = Some((clock, delay));
        self
    }

    pub fn with_status(mut self, status: StreamStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_shards(mut self, shards: &[&str]) -> Self {
        self.shards = shards.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn push_iterator(&self, response: StreamResult<String>) -> &Self {
        self.iterators.lock().push_back(response);
        self
    }

    pub fn push_fetch(&self, response: StreamResult<FetchedBatch>) -> &Self {
        self.fetches.lock().push_back(response);
        self
    }

    pub fn push_put(&self, response: StreamResult<PutRecordOutput>) -> &Self {
        self.puts.lock().push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn iterator_positions(&self) -> Vec<IteratorPosition> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Iterator { position, .. } => Some(position.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fetched_iterators(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Fetch { iterator, .. } => Some(iterator.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn partition_keys(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Put { partition_key, .. } => Some(partition_key.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl StreamService for ScriptedStream {
    async fn stream_status(&self, _stream: &str) -> StreamResult<StreamStatus> {
        Ok(self.status.clone())
    }

    async fn list_shard_ids(&self, _stream: &str) -> StreamResult<Vec<String>> {
        Ok(self.shards.clone())
    }

    async fn get_shard_iterator(
        &self,
        _stream: &str,
        shard_id: &str,
        position: &IteratorPosition,
    ) -> StreamResult<String> {
        let mut calls = self.calls.lock();
        let issued = calls
            .iter()
            .filter(|c| matches!(c, Call::Iterator { .. }))
            .count();
        calls.push(Call::Iterator {
            shard_id: shard_id.to_string(),
            position: position.clone(),
        });
        drop(calls);

        self.iterators
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("iterator-{}", issued)))
    }

    async fn get_records(&self, iterator: &str, limit: usize) -> StreamResult<FetchedBatch> {
        self.calls.lock().push(Call::Fetch {
            iterator: iterator.to_string(),
            limit,
        });
        if let Some((clock, delay)) = &self.fetch_delay {
            clock.advance(*delay);
        }

        self.fetches
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(empty(Some(&format!("{}-next", iterator)))))
    }

    async fn put_record(
        &self,
        _stream: &str,
        partition_key: &str,
        data: Bytes,
    ) -> StreamResult<PutRecordOutput> {
        self.calls.lock().push(Call::Put {
            partition_key: partition_key.to_string(),
            data,
        });

        self.puts.lock().pop_front().unwrap_or_else(|| {
            Ok(PutRecordOutput {
                shard_id: "shardId-000000000000".to_string(),
                sequence_number: "1".to_string(),
            })
        })
    }
}

/// A record whose payload is `data-<seq>`.
pub fn record(seq: &str) -> StreamRecord {
    StreamRecord::new("0.5", format!("data-{}", seq).into_bytes(), seq)
}

/// A batch of records with the given sequence numbers.
pub fn batch(seqs: &[&str], next_iterator: Option<&str>) -> FetchedBatch {
    FetchedBatch::new(
        seqs.iter().map(|s| record(s)).collect(),
        next_iterator.map(str::to_string),
    )
}

pub fn empty(next_iterator: Option<&str>) -> FetchedBatch {
    batch(&[], next_iterator)
}

pub fn throttled<T>() -> StreamResult<T> {
    Err(StreamError::ThroughputExceeded)
}

/// Lease store whose writes hang while stalled.
#[derive(Default)]
pub struct StallingLeaseManager {
    inner: InMemoryLeaseManager,
    stalled: AtomicBool,
}

impl StallingLeaseManager {
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    async fn wait_if_stalled(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl LeaseManager for StallingLeaseManager {
    async fn create_lease_table_if_not_exists(
        &self,
        read_capacity: i64,
        write_capacity: i64,
    ) -> LeaseResult<bool> {
        self.inner
            .create_lease_table_if_not_exists(read_capacity, write_capacity)
            .await
    }

    async fn get_lease(&self, lease_key: &str) -> LeaseResult<Option<Lease>> {
        self.inner.get_lease(lease_key).await
    }

    async fn create_lease_if_not_exists(&self, lease: &Lease) -> LeaseResult<bool> {
        self.wait_if_stalled().await;
        self.inner.create_lease_if_not_exists(lease).await
    }

    async fn update_lease(&self, lease: &Lease) -> LeaseResult<bool> {
        self.wait_if_stalled().await;
        self.inner.update_lease(lease).await
    }
}

/// Manual clock whose sleeps hang while stalled.
#[derive(Debug, Default)]
pub struct StallingClock {
    inner: ManualClock,
    stalled: AtomicBool,
}

impl StallingClock {
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn sleep_count(&self) -> u64 {
        self.inner.sleep_count()
    }
}

#[async_trait]
impl Clock for StallingClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }

    async fn sleep(&self, duration: Duration) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.sleep(duration).await;
    }
}
