//! Caller-owned registry of stream clients.

use super::{KinesisStreamService, StreamService};
use crate::config::AwsConfig;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Maps stream names to the client handle used to reach them.
///
/// One registry is typically built by the caller and shared by every
/// consumer and producer it creates.
#[derive(Default)]
pub struct StreamRegistry {
    clients: DashMap<String, Arc<dyn StreamService>>,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Register (or replace) the client for `stream`.
    pub fn register(&self, stream: &str, client: Arc<dyn StreamService>) {
        self.clients.insert(stream.to_string(), client);
    }

    /// Client registered for `stream`, if any.
    pub fn get(&self, stream: &str) -> Option<Arc<dyn StreamService>> {
        self.clients.get(stream).map(|entry| Arc::clone(entry.value()))
    }

    /// Client for `stream`, connecting a Kinesis client on first use.
    pub async fn get_or_connect(&self, stream: &str, aws: &AwsConfig) -> Arc<dyn StreamService> {
        if let Some(client) = self.get(stream) {
            return client;
        }

        debug!(stream = %stream, region = %aws.region, "Connecting stream client");
        let client: Arc<dyn StreamService> = Arc::new(KinesisStreamService::connect(aws).await);

        // Another task may have connected while we were awaiting
        let entry = self
            .clients
            .entry(stream.to_string())
            .or_insert(client);
        Arc::clone(entry.value())
    }

    /// Names of every registered stream.
    pub fn streams(&self) -> Vec<String> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no stream is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
