//! Amazon Kinesis implementation of [`StreamService`].
//!
//! Key behaviors:
//! - Credentials from explicit config keys, or the default AWS chain
//! - `ProvisionedThroughputExceededException` maps to
//!   [`StreamError::ThroughputExceeded`] for both reads and writes
//! - Shard listing follows `ListShards` pagination

use super::{
    FetchedBatch, IteratorPosition, PutRecordOutput, StreamRecord, StreamResult, StreamService,
    StreamStatus,
};
use crate::aws::build_sdk_config;
use crate::config::AwsConfig;
use crate::error::StreamError;
use async_trait::async_trait;
use aws_sdk_kinesis::error::DisplayErrorContext;
use aws_sdk_kinesis::operation::describe_stream_summary::DescribeStreamSummaryError;
use aws_sdk_kinesis::operation::get_records::GetRecordsError;
use aws_sdk_kinesis::operation::get_shard_iterator::GetShardIteratorError;
use aws_sdk_kinesis::operation::put_record::PutRecordError;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::{Record, ShardIteratorType};
use aws_sdk_kinesis::Client as KinesisClient;
use bytes::Bytes;
use tracing::{debug, info};

/// Kinesis-backed stream service.
#[derive(Debug, Clone)]
pub struct KinesisStreamService {
    client: KinesisClient,
}

impl KinesisStreamService {
    /// Build a client from AWS settings.
    pub async fn connect(aws: &AwsConfig) -> Self {
        let sdk_config = build_sdk_config(aws).await;
        info!(region = %aws.region, "Kinesis client initialized");
        Self::from_client(KinesisClient::new(&sdk_config))
    }

    /// Wrap an existing SDK client.
    pub fn from_client(client: KinesisClient) -> Self {
        Self { client }
    }

    fn convert_record(record: &Record) -> StreamRecord {
        StreamRecord {
            partition_key: record.partition_key().to_string(),
            data: Bytes::copy_from_slice(record.data().as_ref()),
            sequence_number: record.sequence_number().to_string(),
        }
    }
}

#[async_trait]
impl StreamService for KinesisStreamService {
    async fn stream_status(&self, stream: &str) -> StreamResult<StreamStatus> {
        let output = self
            .client
            .describe_stream_summary()
            .stream_name(stream)
            .send()
            .await
            .map_err(|e| {
                let message = DisplayErrorContext(&e).to_string();
                match e.into_service_error() {
                    DescribeStreamSummaryError::ResourceNotFoundException(_) => {
                        StreamError::ResourceNotFound(stream.to_string())
                    }
                    _ => StreamError::Service(message),
                }
            })?;

        let status = output
            .stream_description_summary()
            .map(|summary| summary.stream_status().as_str().to_string())
            .unwrap_or_default();

        Ok(parse_stream_status(&status))
    }

    async fn list_shard_ids(&self, stream: &str) -> StreamResult<Vec<String>> {
        let mut shard_ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // ListShards rejects a stream name alongside a continuation token
            let request = match &next_token {
                Some(token) => self.client.list_shards().next_token(token),
                None => self.client.list_shards().stream_name(stream),
            };

            let output = request
                .send()
                .await
                .map_err(|e| StreamError::Service(DisplayErrorContext(&e).to_string()))?;

            shard_ids.extend(output.shards().iter().map(|s| s.shard_id().to_string()));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(stream = %stream, shards = shard_ids.len(), "Listed shards");
        Ok(shard_ids)
    }

    async fn get_shard_iterator(
        &self,
        stream: &str,
        shard_id: &str,
        position: &IteratorPosition,
    ) -> StreamResult<String> {
        let request = self
            .client
            .get_shard_iterator()
            .stream_name(stream)
            .shard_id(shard_id);

        let request = match position {
            IteratorPosition::TrimHorizon => {
                request.shard_iterator_type(ShardIteratorType::TrimHorizon)
            }
            IteratorPosition::AfterSequenceNumber(seq) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(seq),
        };

        let output = request.send().await.map_err(|e| {
            let message = DisplayErrorContext(&e).to_string();
            match e.into_service_error() {
                GetShardIteratorError::ResourceNotFoundException(_) => {
                    StreamError::ResourceNotFound(format!("{}/{}", stream, shard_id))
                }
                _ => StreamError::IteratorAcquisition {
                    shard_id: shard_id.to_string(),
                    message,
                },
            }
        })?;

        output
            .shard_iterator()
            .map(str::to_string)
            .ok_or_else(|| StreamError::IteratorAcquisition {
                shard_id: shard_id.to_string(),
                message: "service returned no iterator".into(),
            })
    }

    async fn get_records(&self, iterator: &str, limit: usize) -> StreamResult<FetchedBatch> {
        let output = self
            .client
            .get_records()
            .shard_iterator(iterator)
            .limit(limit.min(i32::MAX as usize) as i32)
            .send()
            .await
            .map_err(|e| {
                let message = DisplayErrorContext(&e).to_string();
                match e.into_service_error() {
                    GetRecordsError::ProvisionedThroughputExceededException(_) => {
                        StreamError::ThroughputExceeded
                    }
                    _ => StreamError::Fetch(message),
                }
            })?;

        Ok(FetchedBatch {
            records: output.records().iter().map(Self::convert_record).collect(),
            next_iterator: output.next_shard_iterator().map(str::to_string),
        })
    }

    async fn put_record(
        &self,
        stream: &str,
        partition_key: &str,
        data: Bytes,
    ) -> StreamResult<PutRecordOutput> {
        let output = self
            .client
            .put_record()
            .stream_name(stream)
            .partition_key(partition_key)
            .data(Blob::new(data.to_vec()))
            .send()
            .await
            .map_err(|e| {
                let message = DisplayErrorContext(&e).to_string();
                match e.into_service_error() {
                    PutRecordError::ProvisionedThroughputExceededException(_) => {
                        StreamError::ThroughputExceeded
                    }
                    PutRecordError::ResourceNotFoundException(_) => {
                        StreamError::ResourceNotFound(stream.to_string())
                    }
                    _ => StreamError::Put(message),
                }
            })?;

        Ok(PutRecordOutput {
            shard_id: output.shard_id().to_string(),
            sequence_number: output.sequence_number().to_string(),
        })
    }
}

fn parse_stream_status(status: &str) -> StreamStatus {
    match status {
        "CREATING" => StreamStatus::Creating,
        "DELETING" => StreamStatus::Deleting,
        "ACTIVE" => StreamStatus::Active,
        "UPDATING" => StreamStatus::Updating,
        other => StreamStatus::Unknown(other.to_string()),
    }
}
