//! Per-shard unit of work handed to whoever runs the consumers.

use crate::Result;
use serde::{Deserialize, Serialize};

/// Identifies one shard of one stream, plus the location its output is anchored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSplit {
    pub stream_name: String,
    pub shard_id: String,
    pub anchor_path: String,
}

/// Wire form of a split. New layouts get a new variant; old ones keep decoding.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "version")]
enum SplitEnvelope {
    #[serde(rename = "v1")]
    V1 {
        stream_name: String,
        shard_id: String,
        anchor_path: String,
    },
}

impl ShardSplit {
    pub fn new(
        stream_name: impl Into<String>,
        shard_id: impl Into<String>,
        anchor_path: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            shard_id: shard_id.into(),
            anchor_path: anchor_path.into(),
        }
    }

    /// Serialize to the current (v1) envelope.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let envelope = SplitEnvelope::V1 {
            stream_name: self.stream_name.clone(),
            shard_id: self.shard_id.clone(),
            anchor_path: self.anchor_path.clone(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Deserialize any known envelope version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<SplitEnvelope>(bytes)? {
            SplitEnvelope::V1 {
                stream_name,
                shard_id,
                anchor_path,
            } => Ok(Self {
                stream_name,
                shard_id,
                anchor_path,
            }),
        }
    }
}
