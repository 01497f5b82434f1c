//! Produce command implementation.

use anyhow::{Context, Result};
use kstream_core::metrics::StreamMetrics;
use kstream_core::stream::StreamRegistry;
use kstream_core::{Config, RecordProducer};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

/// Send each non-empty stdin line as one record, echoing where it landed.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let registry = StreamRegistry::new();
    let service = registry
        .get_or_connect(&config.stream.name, &config.aws)
        .await;
    let metrics = Arc::new(StreamMetrics::new());
    let producer = RecordProducer::from_config(&config, service)?.with_metrics(metrics.clone());

    info!(stream = %producer.stream_name(), "Producing records from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.is_empty() {
            continue;
        }

        let output = producer.send(line.into_bytes()).await?;
        let receipt = json!({
            "shard_id": output.shard_id,
            "sequence_number": output.sequence_number,
        });
        stdout.write_all(format!("{}\n", receipt).as_bytes()).await?;
    }
    stdout.flush().await?;

    info!(
        records = metrics.records_written_total(),
        throttled = metrics.throttled_writes_total(),
        "Producer finished"
    );
    Ok(())
}
