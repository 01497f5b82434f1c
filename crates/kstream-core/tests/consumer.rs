//! Shard consumer behavior against a scripted stream.

mod common;

use common::{
    batch, empty, throttled, Call, ScriptedStream, StallingClock, StallingLeaseManager,
};
use kstream_core::checkpoint::{
    CheckpointKey, InMemoryLeaseManager, Lease, LeaseManager, ShardCheckpointer,
};
use kstream_core::clock::ManualClock;
use kstream_core::consumer::{ConsumerStatus, RetryConfig, ShardConsumer, ShardConsumerBuilder};
use kstream_core::error::StreamError;
use kstream_core::metrics::{StopReason, StreamMetrics};
use kstream_core::stream::IteratorPosition;
use kstream_core::{Config, Error};
use std::sync::Arc;
use std::time::Duration;

const STREAM: &str = "STREAM_NAME_1";
const SHARD: &str = "SHARD_ID_1";
const LOGICAL: &str = "LOGICAL_PROCESS_1";

fn builder(stream: &Arc<ScriptedStream>, clock: &Arc<ManualClock>) -> ShardConsumerBuilder {
    ShardConsumerBuilder::new(stream.clone(), STREAM, SHARD)
        .with_batch_size(1000)
        .with_retry_config(RetryConfig::new(3, Duration::from_secs(1)))
        .with_iteration_timeout(Duration::from_secs(15 * 60))
        .with_clock(clock.clone())
}

fn checkpointer(
    leases: &Arc<InMemoryLeaseManager>,
    clock: &Arc<ManualClock>,
    iteration: u32,
    interval: Duration,
) -> ShardCheckpointer {
    ShardCheckpointer::new(
        leases.clone(),
        CheckpointKey::new(LOGICAL, STREAM, SHARD, iteration),
        interval,
        clock.clone(),
    )
}

async fn drain(consumer: &mut ShardConsumer) -> Vec<String> {
    let mut seqs = Vec::new();
    while let Some(record) = consumer.next_record().await.unwrap() {
        seqs.push(record.sequence_number);
    }
    seqs
}

#[tokio::test]
async fn test_reads_batches_until_shard_closed() {
    let stream = Arc::new(ScriptedStream::new());
    stream
        .push_fetch(Ok(batch(&["1", "2", "3", "4"], Some("next-1"))))
        .push_fetch(Ok(batch(&["5", "6"], Some("next-2"))))
        .push_fetch(Ok(empty(None)));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock).build().await.unwrap();
    let seqs = drain(&mut consumer).await;

    assert_eq!(seqs, vec!["1", "2", "3", "4", "5", "6"]);
    assert_eq!(consumer.status(), ConsumerStatus::Closed);
    assert!(consumer.is_shard_closed());
    assert_eq!(consumer.records_read(), 6);

    // Each fetch cycle starts from a fresh iterator after the last record read
    assert_eq!(
        stream.iterator_positions(),
        vec![
            IteratorPosition::TrimHorizon,
            IteratorPosition::AfterSequenceNumber("4".into()),
            IteratorPosition::AfterSequenceNumber("6".into()),
        ]
    );
    assert_eq!(clock.sleep_count(), 0);
}

#[tokio::test]
async fn test_records_yielded_one_per_pull() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(batch(&["1", "2", "3"], Some("next-1"))));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock).build().await.unwrap();
    let first = consumer.next_record().await.unwrap().unwrap();
    assert_eq!(first.sequence_number, "1");
    assert_eq!(first.data_str(), Some("data-1"));

    consumer.next_record().await.unwrap();
    consumer.next_record().await.unwrap();

    // Draining a batch does not trigger the next fetch
    assert_eq!(stream.calls().len(), 2);
    assert_eq!(consumer.last_sequence_number(), Some("3"));
}

#[tokio::test]
async fn test_closed_shard_is_permanent() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(empty(None)));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock).build().await.unwrap();
    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::Closed);

    let calls = stream.calls().len();
    assert!(consumer.next_record().await.unwrap().is_none());
    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(stream.calls().len(), calls);
}

#[tokio::test]
async fn test_last_batch_of_closed_shard_is_delivered() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(batch(&["1", "2"], None)));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock).build().await.unwrap();
    assert_eq!(drain(&mut consumer).await, vec!["1", "2"]);
    assert_eq!(consumer.status(), ConsumerStatus::Closed);

    // No new iterator once the shard is known closed
    assert_eq!(stream.iterator_positions().len(), 1);
}

#[tokio::test]
async fn test_empty_fetch_retries_chain_next_iterator() {
    let stream = Arc::new(ScriptedStream::new());
    stream
        .push_fetch(Ok(empty(Some("next-1"))))
        .push_fetch(Ok(empty(Some("next-2"))))
        .push_fetch(Ok(batch(&["1"], Some("next-3"))));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock).build().await.unwrap();
    let record = consumer.next_record().await.unwrap().unwrap();

    assert_eq!(record.sequence_number, "1");
    assert_eq!(
        stream.fetched_iterators(),
        vec!["iterator-0", "next-1", "next-2"]
    );
    assert_eq!(stream.iterator_positions().len(), 1);
    assert_eq!(clock.sleep_count(), 2);
    assert_eq!(consumer.status(), ConsumerStatus::Iterating);
}

#[tokio::test]
async fn test_retries_exhausted_is_not_closed() {
    let stream = Arc::new(ScriptedStream::new());
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock)
        .with_retry_config(RetryConfig::new(2, Duration::from_millis(500)))
        .build()
        .await
        .unwrap();

    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::Exhausted);
    assert!(!consumer.is_shard_closed());

    // Initial fetch plus two retries
    assert_eq!(
        stream.fetched_iterators(),
        vec!["iterator-0", "iterator-0-next", "iterator-0-next-next"]
    );
    assert_eq!(clock.sleep_count(), 2);

    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(stream.fetched_iterators().len(), 3);
}

#[tokio::test]
async fn test_zero_retries_stops_after_first_empty_fetch() {
    let stream = Arc::new(ScriptedStream::new());
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock)
        .with_retry_config(RetryConfig::new(0, Duration::from_secs(1)))
        .build()
        .await
        .unwrap();

    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::Exhausted);
    assert_eq!(stream.fetched_iterators().len(), 1);
    assert_eq!(clock.sleep_count(), 0);
}

#[tokio::test]
async fn test_closed_wins_over_remaining_retries() {
    let stream = Arc::new(ScriptedStream::new());
    stream
        .push_fetch(Ok(empty(Some("next-1"))))
        .push_fetch(Ok(empty(None)));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock)
        .with_retry_config(RetryConfig::new(10, Duration::from_secs(1)))
        .build()
        .await
        .unwrap();

    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::Closed);
    assert_eq!(stream.fetched_iterators().len(), 2);
    assert_eq!(clock.sleep_count(), 1);
}

#[tokio::test]
async fn test_passed_deadline_issues_no_fetch() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(batch(&["1"], Some("next-1"))));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock)
        .with_iteration_timeout(Duration::from_secs(60))
        .build()
        .await
        .unwrap();
    clock.advance(Duration::from_secs(61));

    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::TimedOut);
    assert!(stream.calls().is_empty());
}

#[tokio::test]
async fn test_deadline_checked_before_yielding_buffered_records() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(batch(&["1", "2", "3"], Some("next-1"))));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock)
        .with_iteration_timeout(Duration::from_secs(60))
        .build()
        .await
        .unwrap();

    assert!(consumer.next_record().await.unwrap().is_some());
    clock.advance(Duration::from_secs(120));
    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::TimedOut);
}

#[tokio::test]
async fn test_deadline_checked_after_retry_sleep() {
    let stream = Arc::new(ScriptedStream::new());
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock)
        .with_retry_config(RetryConfig::new(10, Duration::from_secs(40)))
        .with_iteration_timeout(Duration::from_secs(60))
        .build()
        .await
        .unwrap();

    // Fetch at 0s, sleep to 40s, fetch, sleep to 80s, past the deadline
    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::TimedOut);
    assert_eq!(stream.fetched_iterators().len(), 2);
    assert_eq!(clock.sleep_count(), 2);
}

#[tokio::test]
async fn test_deadline_checked_after_slow_fetch() {
    let clock = Arc::new(ManualClock::default());
    let stream = Arc::new(
        ScriptedStream::new().with_fetch_delay(clock.clone(), Duration::from_secs(120)),
    );
    stream.push_fetch(Ok(batch(&["1"], Some("next-1"))));

    let mut consumer = builder(&stream, &clock)
        .with_iteration_timeout(Duration::from_secs(60))
        .build()
        .await
        .unwrap();

    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::TimedOut);
    assert_eq!(consumer.records_read(), 0);
    assert_eq!(stream.fetched_iterators().len(), 1);
}

#[tokio::test]
async fn test_throttled_fetch_consumes_retry_with_same_iterator() {
    let stream = Arc::new(ScriptedStream::new());
    stream
        .push_fetch(throttled())
        .push_fetch(Ok(batch(&["1"], Some("next-1"))));
    let clock = Arc::new(ManualClock::default());
    let metrics = Arc::new(StreamMetrics::new());

    let mut consumer = builder(&stream, &clock)
        .with_metrics(metrics.clone())
        .build()
        .await
        .unwrap();

    assert!(consumer.next_record().await.unwrap().is_some());
    assert_eq!(stream.fetched_iterators(), vec!["iterator-0", "iterator-0"]);
    assert_eq!(clock.sleep_count(), 1);
    assert_eq!(metrics.throttled_fetches_total(), 1);
}

#[tokio::test]
async fn test_fetch_failure_ends_consumer() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Err(StreamError::Fetch("expired iterator".into())));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock).build().await.unwrap();
    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::Exhausted);
    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(stream.fetched_iterators().len(), 1);
}

#[tokio::test]
async fn test_iterator_failure_propagates() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_iterator(Err(StreamError::IteratorAcquisition {
        shard_id: SHARD.into(),
        message: "access denied".into(),
    }));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock).build().await.unwrap();
    let err = consumer.next_record().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Stream(StreamError::IteratorAcquisition { .. })
    ));
    assert!(!consumer.status().is_terminal());
    assert!(stream.fetched_iterators().is_empty());
}

#[tokio::test]
async fn test_next_batch_respects_max() {
    let stream = Arc::new(ScriptedStream::new());
    stream
        .push_fetch(Ok(batch(&["1", "2", "3", "4", "5"], Some("next-1"))))
        .push_fetch(Ok(empty(None)));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock).build().await.unwrap();

    let first = consumer.next_batch(3).await.unwrap();
    assert_eq!(first.len(), 3);
    let second = consumer.next_batch(3).await.unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(second[1].sequence_number, "5");
    assert_eq!(consumer.status(), ConsumerStatus::Closed);
    assert!(consumer.next_batch(3).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_size_passed_as_fetch_limit() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(empty(None)));
    let clock = Arc::new(ManualClock::default());

    let mut consumer = builder(&stream, &clock)
        .with_batch_size(250)
        .build()
        .await
        .unwrap();
    consumer.next_record().await.unwrap();

    assert!(stream.calls().contains(&Call::Fetch {
        iterator: "iterator-0".into(),
        limit: 250,
    }));
}

#[tokio::test]
async fn test_zeroth_iteration_starts_at_trim_horizon() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(empty(None)));
    let clock = Arc::new(ManualClock::default());
    let leases = Arc::new(InMemoryLeaseManager::new());

    let mut consumer = builder(&stream, &clock)
        .with_checkpointer(checkpointer(&leases, &clock, 0, Duration::from_secs(60)))
        .build()
        .await
        .unwrap();
    consumer.next_record().await.unwrap();

    assert_eq!(stream.iterator_positions(), vec![IteratorPosition::TrimHorizon]);
    assert_eq!(leases.get_calls(), 0);
}

#[tokio::test]
async fn test_resumes_after_previous_iteration_checkpoint() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(empty(None)));
    let clock = Arc::new(ManualClock::default());
    let leases = Arc::new(InMemoryLeaseManager::new());
    let previous = CheckpointKey::new(LOGICAL, STREAM, SHARD, 2);
    leases
        .create_lease_if_not_exists(&Lease::new(previous.to_string()).with_checkpoint("S"))
        .await
        .unwrap();

    let mut consumer = builder(&stream, &clock)
        .with_checkpointer(checkpointer(&leases, &clock, 3, Duration::from_secs(60)))
        .build()
        .await
        .unwrap();
    assert_eq!(consumer.last_sequence_number(), Some("S"));

    consumer.next_record().await.unwrap();
    assert_eq!(
        stream.iterator_positions(),
        vec![IteratorPosition::AfterSequenceNumber("S".into())]
    );
}

#[tokio::test]
async fn test_checkpoints_are_time_gated_and_forced_on_close() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(batch(&["1", "2", "3"], Some("next-1"))));
    let clock = Arc::new(ManualClock::default());
    let leases = Arc::new(InMemoryLeaseManager::new());
    let key = CheckpointKey::new(LOGICAL, STREAM, SHARD, 1).to_string();

    let mut consumer = builder(&stream, &clock)
        .with_checkpointer(checkpointer(&leases, &clock, 1, Duration::from_secs(60)))
        .build()
        .await
        .unwrap();

    consumer.next_record().await.unwrap();
    assert!(leases.get_lease(&key).await.unwrap().is_none());

    // The due write covers the record returned by the previous pull
    clock.advance(Duration::from_secs(61));
    let second = consumer.next_record().await.unwrap().unwrap();
    assert_eq!(second.sequence_number, "2");
    let lease = leases.get_lease(&key).await.unwrap().unwrap();
    assert_eq!(lease.checkpoint.as_deref(), Some("1"));

    consumer.next_record().await.unwrap();
    let lease = leases.get_lease(&key).await.unwrap().unwrap();
    assert_eq!(lease.checkpoint.as_deref(), Some("1"));

    consumer.close().await;
    let lease = leases.get_lease(&key).await.unwrap().unwrap();
    assert_eq!(lease.checkpoint.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_close_without_reads_writes_nothing() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(empty(None)));
    let clock = Arc::new(ManualClock::default());
    let leases = Arc::new(InMemoryLeaseManager::new());
    let previous = CheckpointKey::new(LOGICAL, STREAM, SHARD, 0);
    leases
        .create_lease_if_not_exists(&Lease::new(previous.to_string()).with_checkpoint("S"))
        .await
        .unwrap();

    let mut consumer = builder(&stream, &clock)
        .with_checkpointer(checkpointer(&leases, &clock, 1, Duration::from_secs(60)))
        .build()
        .await
        .unwrap();
    assert!(consumer.next_record().await.unwrap().is_none());
    consumer.close().await;

    assert_eq!(leases.len(), 1);
}

#[tokio::test]
async fn test_checkpointer_for_other_shard_rejected() {
    let stream = Arc::new(ScriptedStream::new());
    let clock = Arc::new(ManualClock::default());
    let leases = Arc::new(InMemoryLeaseManager::new());
    let foreign = ShardCheckpointer::new(
        leases,
        CheckpointKey::new(LOGICAL, STREAM, "SHARD_ID_2", 0),
        Duration::from_secs(60),
        clock.clone(),
    );

    let result = builder(&stream, &clock)
        .with_checkpointer(foreign)
        .build()
        .await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_from_config_with_checkpointing() {
    let stream = Arc::new(ScriptedStream::new());
    stream.push_fetch(Ok(batch(&["10", "11"], None)));
    let clock = Arc::new(ManualClock::default());
    let leases = Arc::new(InMemoryLeaseManager::new());
    let metrics = Arc::new(StreamMetrics::new());

    let mut config = Config::for_stream(STREAM);
    config.stream.batch_size = 500;
    config.checkpoint.enabled = true;
    config.checkpoint.table_name = Some("leases".into());
    config.checkpoint.logical_name = Some(LOGICAL.into());
    config.checkpoint.iteration_number = 4;

    let mut consumer = ShardConsumer::from_config(
        &config,
        stream.clone(),
        SHARD,
        Some(leases.clone() as Arc<dyn LeaseManager>),
        clock.clone(),
        Some(metrics.clone()),
    )
    .await
    .unwrap();

    assert_eq!(consumer.next_batch(10).await.unwrap().len(), 2);
    consumer.close().await;

    let key = CheckpointKey::new(LOGICAL, STREAM, SHARD, 4).to_string();
    let lease = leases.get_lease(&key).await.unwrap().unwrap();
    assert_eq!(lease.checkpoint.as_deref(), Some("11"));

    assert_eq!(metrics.records_read_total(), 2);
    assert_eq!(metrics.fetches_total(), 1);
    assert_eq!(metrics.checkpoints_total(), 1);
    assert_eq!(metrics.stops_by_reason(StopReason::Closed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pull_dropped_during_retry_sleep_loses_nothing() {
    let stream = Arc::new(ScriptedStream::new());
    stream
        .push_fetch(Ok(empty(Some("next-1"))))
        .push_fetch(Ok(batch(&["1", "2"], Some("next-2"))));
    let clock = Arc::new(StallingClock::default());
    clock.set_stalled(true);

    let mut consumer = ShardConsumerBuilder::new(stream.clone(), STREAM, SHARD)
        .with_retry_config(RetryConfig::new(3, Duration::from_secs(1)))
        .with_clock(clock.clone())
        .build()
        .await
        .unwrap();

    let pull = tokio::time::timeout(Duration::from_millis(50), consumer.next_record()).await;
    assert!(pull.is_err());
    assert_eq!(consumer.status(), ConsumerStatus::Retrying);
    assert_eq!(consumer.records_read(), 0);

    // The next pull starts a new cycle from the same position
    clock.set_stalled(false);
    assert_eq!(take_records(&mut consumer, 2).await, vec!["1", "2"]);
    assert_eq!(
        stream.iterator_positions(),
        vec![IteratorPosition::TrimHorizon, IteratorPosition::TrimHorizon]
    );
    assert_eq!(clock.sleep_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pull_dropped_during_checkpoint_write_loses_nothing() {
    let stream = Arc::new(ScriptedStream::new());
    stream
        .push_fetch(Ok(batch(&["1", "2"], Some("next-1"))))
        .push_fetch(Ok(empty(None)));
    let clock = Arc::new(ManualClock::default());
    let leases = Arc::new(StallingLeaseManager::default());
    let key = CheckpointKey::new(LOGICAL, STREAM, SHARD, 1);

    let mut consumer = builder(&stream, &clock)
        .with_checkpointer(ShardCheckpointer::new(
            leases.clone(),
            key.clone(),
            Duration::ZERO,
            clock.clone(),
        ))
        .build()
        .await
        .unwrap();

    // Nothing has been returned yet, so nothing is written
    leases.set_stalled(true);
    let first = consumer.next_record().await.unwrap().unwrap();
    assert_eq!(first.sequence_number, "1");

    // The write for "1" hangs and the pull is dropped before "2" leaves the buffer
    let pull = tokio::time::timeout(Duration::from_millis(50), consumer.next_record()).await;
    assert!(pull.is_err());
    assert_eq!(consumer.records_read(), 1);
    assert_eq!(consumer.last_sequence_number(), Some("1"));
    assert!(leases.get_lease(&key.to_string()).await.unwrap().is_none());

    leases.set_stalled(false);
    let second = consumer.next_record().await.unwrap().unwrap();
    assert_eq!(second.sequence_number, "2");
    let lease = leases.get_lease(&key.to_string()).await.unwrap().unwrap();
    assert_eq!(lease.checkpoint.as_deref(), Some("1"));

    assert!(consumer.next_record().await.unwrap().is_none());
    assert_eq!(consumer.status(), ConsumerStatus::Closed);
    assert_eq!(consumer.records_read(), 2);

    consumer.close().await;
    let lease = leases.get_lease(&key.to_string()).await.unwrap().unwrap();
    assert_eq!(lease.checkpoint.as_deref(), Some("2"));
}

/// Pull `count` records, failing if the consumer stops early.
async fn take_records(consumer: &mut ShardConsumer, count: usize) -> Vec<String> {
    let mut seqs = Vec::new();
    while seqs.len() < count {
        let record = consumer.next_record().await.unwrap().unwrap();
        seqs.push(record.sequence_number);
    }
    seqs
}
