//! Shard discovery.

use super::StreamService;
use crate::error::StreamError;
use crate::split::ShardSplit;
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Lists the shards of a stream, refusing streams that cannot be read.
pub struct ShardCatalog {
    service: Arc<dyn StreamService>,
}

impl ShardCatalog {
    pub fn new(service: Arc<dyn StreamService>) -> Self {
        Self { service }
    }

    /// Ids of every shard in `stream`.
    ///
    /// Fails with [`StreamError::StreamNotReadable`] unless the stream is
    /// ACTIVE or UPDATING.
    pub async fn shard_ids(&self, stream: &str) -> Result<Vec<String>> {
        let status = self.service.stream_status(stream).await?;
        if !status.is_readable() {
            return Err(StreamError::StreamNotReadable {
                stream: stream.to_string(),
                status: status.to_string(),
            }
            .into());
        }

        let shard_ids = self.service.list_shard_ids(stream).await?;
        info!(stream = %stream, status = %status, shards = shard_ids.len(), "Discovered shards");
        Ok(shard_ids)
    }

    /// One split per shard of `stream`, all anchored at `anchor_path`.
    pub async fn splits(&self, stream: &str, anchor_path: &str) -> Result<Vec<ShardSplit>> {
        Ok(self
            .shard_ids(stream)
            .await?
            .into_iter()
            .map(|shard_id| ShardSplit::new(stream, shard_id, anchor_path))
            .collect())
    }
}
