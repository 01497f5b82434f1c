//! Consume command implementation.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::try_join_all;
use kstream_core::checkpoint::{DynamoDbLeaseManager, LeaseManager};
use kstream_core::metrics::StreamMetrics;
use kstream_core::stream::{ShardCatalog, StreamRegistry, StreamService};
use kstream_core::{Clock, Config, ShardConsumer, StreamRecord, SystemClock};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// One output line.
#[derive(Debug, Serialize)]
struct OutputRecord {
    shard_id: String,
    sequence_number: String,
    partition_key: String,
    /// Base64 of the raw payload
    data: String,
}

impl OutputRecord {
    fn new(shard_id: &str, record: StreamRecord) -> Self {
        Self {
            shard_id: shard_id.to_string(),
            sequence_number: record.sequence_number,
            partition_key: record.partition_key,
            data: STANDARD.encode(&record.data),
        }
    }
}

/// Everything a shard task needs, shared across tasks.
struct ShardContext {
    config: Config,
    service: Arc<dyn StreamService>,
    lease_manager: Option<Arc<dyn LeaseManager>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<StreamMetrics>,
}

/// Run one consumer per shard and write every record to stdout as a JSON line.
pub async fn run(config: Config, print_metrics: bool) -> Result<()> {
    config.validate()?;

    let registry = StreamRegistry::new();
    let service = registry
        .get_or_connect(&config.stream.name, &config.aws)
        .await;
    let shard_ids = ShardCatalog::new(service.clone())
        .shard_ids(&config.stream.name)
        .await?;

    let lease_manager: Option<Arc<dyn LeaseManager>> = if config.checkpoint.enabled {
        let table = config
            .checkpoint
            .table_name
            .clone()
            .context("checkpoint.table_name is required when checkpointing is enabled")?;
        Some(Arc::new(DynamoDbLeaseManager::connect(&config.aws, table).await))
    } else {
        None
    };

    info!(
        stream = %config.stream.name,
        shards = shard_ids.len(),
        iteration = config.checkpoint.iteration_number,
        checkpointing = config.checkpoint.enabled,
        "Starting consumers"
    );

    let metrics = Arc::new(StreamMetrics::new());
    let context = Arc::new(ShardContext {
        config,
        service,
        lease_manager,
        clock: Arc::new(SystemClock),
        metrics: metrics.clone(),
    });

    let (record_tx, mut record_rx) = mpsc::channel::<OutputRecord>(1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles: Vec<_> = shard_ids
        .into_iter()
        .map(|shard_id| {
            tokio::spawn(consume_shard(
                Arc::clone(&context),
                shard_id,
                record_tx.clone(),
                shutdown_rx.clone(),
            ))
        })
        .collect();
    drop(record_tx);

    // Stop every consumer at its next record on SIGINT
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT (Ctrl+C), stopping consumers");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut stdout = tokio::io::stdout();
    while let Some(record) = record_rx.recv().await {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
    }
    stdout.flush().await?;

    let per_shard = try_join_all(handles).await?;
    let mut total = 0;
    for result in per_shard {
        total += result?;
    }

    info!(records = total, "All consumers finished");
    if print_metrics {
        eprint!("{}", metrics.export_prometheus_text());
    }

    if *shutdown_rx.borrow() {
        return Err(kstream_core::Error::Shutdown.into());
    }
    Ok(())
}

/// Drain one shard. Returns the number of records read.
async fn consume_shard(
    context: Arc<ShardContext>,
    shard_id: String,
    records: mpsc::Sender<OutputRecord>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64> {
    let mut consumer = ShardConsumer::from_config(
        &context.config,
        Arc::clone(&context.service),
        &shard_id,
        context.lease_manager.clone(),
        Arc::clone(&context.clock),
        Some(Arc::clone(&context.metrics)),
    )
    .await?;

    loop {
        let next = tokio::select! {
            biased;
            Ok(()) = shutdown.changed() => break,
            next = consumer.next_record() => next,
        };

        let record = match next {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                // Checkpoint what was read before surfacing the error
                let read = consumer.records_read();
                consumer.close().await;
                warn!(shard_id = %shard_id, records = read, "Shard consumer failed");
                return Err(e.into());
            }
        };

        if records
            .send(OutputRecord::new(&shard_id, record))
            .await
            .is_err()
        {
            break;
        }
    }

    let read = consumer.records_read();
    consumer.close().await;
    Ok(read)
}
