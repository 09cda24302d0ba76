// Copyright 2025 Cowboy AI, LLC.

//! Processing-position checkpoints
//!
//! Each worker records the last offset it processed per source topic so a
//! restart resumes where the previous run stopped instead of reprocessing
//! from the beginning. Checkpoints are flushed opportunistically during
//! processing and always on shutdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use async_nats::jetstream::kv::Store as KvStore;

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Underlying storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Progress of one worker over its source topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCheckpoint {
    /// Worker the checkpoint belongs to (e.g. "aggregator-city")
    pub worker: String,
    /// Last processed offset per topic
    pub positions: HashMap<String, u64>,
    /// Total events this worker has processed
    pub events_processed: u64,
    /// Per-event errors the worker has contained
    pub errors: u64,
    /// Description of the last contained error, if any
    pub last_error: Option<String>,
    /// When the checkpoint was last updated
    pub updated_at: DateTime<Utc>,
}

impl SourceCheckpoint {
    /// Fresh checkpoint for a worker with no progress yet
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            positions: HashMap::new(),
            events_processed: 0,
            errors: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Record that the worker processed the given topic offset
    pub fn advance(&mut self, topic: &str, offset: u64) {
        self.positions
            .entry(topic.to_string())
            .and_modify(|existing| *existing = (*existing).max(offset))
            .or_insert(offset);
        self.events_processed += 1;
        self.updated_at = Utc::now();
    }

    /// Record a contained per-event error
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors += 1;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Last processed offset for a topic, if any
    pub fn position(&self, topic: &str) -> Option<u64> {
        self.positions.get(topic).copied()
    }
}

/// Trait for checkpoint storage implementations
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save or update a checkpoint
    async fn save(&self, checkpoint: &SourceCheckpoint) -> Result<(), CheckpointError>;

    /// Load a checkpoint by worker name
    async fn load(&self, worker: &str) -> Result<Option<SourceCheckpoint>, CheckpointError>;
}

/// In-memory checkpoint storage for testing
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<tokio::sync::RwLock<HashMap<String, SourceCheckpoint>>>,
}

impl InMemoryCheckpointStore {
    /// Create a new in-memory checkpoint store
    pub fn new() -> Self {
        Self {
            checkpoints: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryCheckpointStore {
    fn clone(&self) -> Self {
        Self {
            checkpoints: Arc::clone(&self.checkpoints),
        }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &SourceCheckpoint) -> Result<(), CheckpointError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(checkpoint.worker.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, worker: &str) -> Result<Option<SourceCheckpoint>, CheckpointError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(worker).cloned())
    }
}

/// JetStream KV checkpoint storage
pub struct JetStreamCheckpointStore {
    kv_store: Arc<KvStore>,
}

impl JetStreamCheckpointStore {
    /// Wrap an existing KV bucket
    pub fn new(kv_store: KvStore) -> Self {
        Self {
            kv_store: Arc::new(kv_store),
        }
    }

    fn entry_key(worker: &str) -> String {
        format!("checkpoint.{worker}")
    }
}

#[async_trait::async_trait]
impl CheckpointStore for JetStreamCheckpointStore {
    async fn save(&self, checkpoint: &SourceCheckpoint) -> Result<(), CheckpointError> {
        let value = serde_json::to_vec(checkpoint)?;
        self.kv_store
            .put(Self::entry_key(&checkpoint.worker), value.into())
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;

        debug!(
            worker = %checkpoint.worker,
            events_processed = checkpoint.events_processed,
            "Saved checkpoint"
        );
        Ok(())
    }

    async fn load(&self, worker: &str) -> Result<Option<SourceCheckpoint>, CheckpointError> {
        match self
            .kv_store
            .get(Self::entry_key(worker))
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let store = InMemoryCheckpointStore::new();
        let mut checkpoint = SourceCheckpoint::new("aggregator-city");
        checkpoint.advance("sales.raw.db", 41);
        checkpoint.advance("sales.raw.file", 7);

        store.save(&checkpoint).await.unwrap();
        let loaded = store.load("aggregator-city").await.unwrap().unwrap();

        assert_eq!(loaded.position("sales.raw.db"), Some(41));
        assert_eq!(loaded.position("sales.raw.file"), Some(7));
        assert_eq!(loaded.events_processed, 2);
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_none() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load("nobody").await.unwrap().is_none());
    }

    #[test]
    fn test_advance_keeps_highest_offset() {
        let mut checkpoint = SourceCheckpoint::new("recorder");
        checkpoint.advance("sales.raw.db", 10);
        // A replayed lower offset never regresses the position
        checkpoint.advance("sales.raw.db", 4);
        assert_eq!(checkpoint.position("sales.raw.db"), Some(10));
        assert_eq!(checkpoint.events_processed, 2);
    }

    #[test]
    fn test_record_error_tracks_last() {
        let mut checkpoint = SourceCheckpoint::new("recorder");
        checkpoint.record_error("bad quantity");
        checkpoint.record_error("missing key");
        assert_eq!(checkpoint.errors, 2);
        assert_eq!(checkpoint.last_error.as_deref(), Some("missing key"));
    }
}
