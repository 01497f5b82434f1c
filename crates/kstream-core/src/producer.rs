//! Single-record producer with throttle retry.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::StreamError;
use crate::metrics::StreamMetrics;
use crate::stream::{PutRecordOutput, StreamService};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Sleep between throttled attempts when nothing else is configured.
pub const DEFAULT_THROTTLE_RETRY: Duration = Duration::from_millis(10);

/// Writes records to one stream under random partition keys.
pub struct RecordProducer {
    service: Arc<dyn StreamService>,
    stream_name: String,
    throttle_retry: Duration,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<StreamMetrics>>,
}

impl RecordProducer {
    /// Create a producer for `stream_name`, which must not be blank.
    pub fn new(service: Arc<dyn StreamService>, stream_name: impl Into<String>) -> Result<Self> {
        let stream_name = stream_name.into();
        if stream_name.trim().is_empty() {
            return Err(Error::Config("stream name cannot be empty".into()));
        }

        Ok(Self {
            service,
            stream_name,
            throttle_retry: DEFAULT_THROTTLE_RETRY,
            clock: Arc::new(SystemClock),
            metrics: None,
        })
    }

    /// Create a producer from the stream and producer sections of `config`.
    pub fn from_config(config: &Config, service: Arc<dyn StreamService>) -> Result<Self> {
        Ok(Self::new(service, &config.stream.name)?
            .with_throttle_retry(config.producer.throttle_retry()))
    }

    pub fn with_throttle_retry(mut self, delay: Duration) -> Self {
        self.throttle_retry = delay;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<StreamMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Submit `data`, retrying for as long as the stream reports it is over
    /// its write throughput. Each attempt uses a fresh partition key.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<PutRecordOutput> {
        let data = data.into();
        // TODO: cap throttle retries with a configurable attempt limit
        loop {
            let partition_key = random_partition_key();
            match self
                .service
                .put_record(&self.stream_name, &partition_key, data.clone())
                .await
            {
                Ok(output) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_write();
                    }
                    debug!(
                        stream = %self.stream_name,
                        shard_id = %output.shard_id,
                        sequence_number = %output.sequence_number,
                        "Record written"
                    );
                    return Ok(output);
                }
                Err(StreamError::ThroughputExceeded) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_throttled_write();
                    }
                    debug!(
                        stream = %self.stream_name,
                        delay_ms = self.throttle_retry.as_millis() as u64,
                        "Write throttled, retrying"
                    );
                    self.clock.sleep(self.throttle_retry).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Uniformly random key in `[0, 1)` rendered as a decimal string.
fn random_partition_key() -> String {
    rand::random::<f64>().to_string()
}
