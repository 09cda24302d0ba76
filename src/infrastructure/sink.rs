// Copyright 2025 Cowboy AI, LLC.

//! Upsert sink for aggregate snapshots
//!
//! Sinks persist full-state snapshot rows keyed by (dimension key, window
//! start). Upserts are idempotent and last-write-wins on the non-key
//! columns, which is safe because the aggregator re-emits the complete
//! accumulated state on every update: a later emission dominates an earlier
//! one for the same window.

use crate::state_store::sanitize_key;
use crate::window::WindowBounds;
use async_nats::jetstream::kv::Store as KvStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors from sink writes
#[derive(Debug, Error)]
pub enum SinkError {
    /// Underlying storage failed; retrying can succeed
    #[error("Sink storage error: {0}")]
    Storage(String),

    /// The row could not be serialized; retrying cannot succeed
    #[error("Sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkError {
    /// Whether retrying the write can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Storage(_))
    }
}

/// Durable table of snapshot rows keyed by (dimension key, window start)
#[async_trait]
pub trait UpsertSink<R: Send + Sync>: Send + Sync {
    /// Name of the sink table, for logging
    fn table(&self) -> &str;

    /// Insert or overwrite the row for (key, window start); all non-key
    /// fields take the new row's values
    async fn upsert(&self, key: &str, bounds: WindowBounds, row: &R) -> Result<(), SinkError>;
}

/// In-memory sink for tests and demos
pub struct InMemoryUpsertSink<R> {
    table: String,
    rows: Arc<tokio::sync::RwLock<HashMap<(String, i64), R>>>,
}

impl<R: Clone> InMemoryUpsertSink<R> {
    /// Create an empty sink table
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    /// Read back the stored row for (key, window start)
    pub async fn get(&self, key: &str, window_start: i64) -> Option<R> {
        let rows = self.rows.read().await;
        rows.get(&(key.to_string(), window_start)).cloned()
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the table is empty
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Every stored row
    pub async fn all(&self) -> Vec<R> {
        self.rows.read().await.values().cloned().collect()
    }
}

impl<R> Clone for InMemoryUpsertSink<R> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            rows: Arc::clone(&self.rows),
        }
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> UpsertSink<R> for InMemoryUpsertSink<R> {
    fn table(&self) -> &str {
        &self.table
    }

    async fn upsert(&self, key: &str, bounds: WindowBounds, row: &R) -> Result<(), SinkError> {
        let mut rows = self.rows.write().await;
        rows.insert((key.to_string(), bounds.start), row.clone());
        Ok(())
    }
}

/// JetStream KV sink; one bucket per sink table
pub struct JetStreamKvSink {
    table: String,
    kv_store: Arc<KvStore>,
}

impl JetStreamKvSink {
    /// Wrap an existing KV bucket as a sink table
    pub fn new(table: impl Into<String>, kv_store: KvStore) -> Self {
        Self {
            table: table.into(),
            kv_store: Arc::new(kv_store),
        }
    }

    fn entry_key(key: &str, bounds: WindowBounds) -> String {
        format!("{}.{}", sanitize_key(key), bounds.start)
    }

    /// Read back a stored row, for queries and tests
    pub async fn get<R: DeserializeOwned>(
        &self,
        key: &str,
        bounds: WindowBounds,
    ) -> Result<Option<R>, SinkError> {
        match self
            .kv_store
            .get(Self::entry_key(key, bounds))
            .await
            .map_err(|e| SinkError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<R: Serialize + Send + Sync> UpsertSink<R> for JetStreamKvSink {
    fn table(&self) -> &str {
        &self.table
    }

    async fn upsert(&self, key: &str, bounds: WindowBounds, row: &R) -> Result<(), SinkError> {
        let value = serde_json::to_vec(row)?;
        self.kv_store
            .put(Self::entry_key(key, bounds), value.into())
            .await
            .map_err(|e| SinkError::Storage(e.to_string()))?;
        debug!(table = %self.table, key = %key, window_start = bounds.start, "Upserted snapshot");
        Ok(())
    }
}

/// A snapshot that exhausted its sink retry budget
#[derive(Debug, Clone)]
pub struct DeadLetter<R> {
    /// Dimension key of the failed snapshot
    pub key: String,
    /// Window the snapshot belongs to
    pub bounds: WindowBounds,
    /// The row that could not be written
    pub row: R,
    /// The final error message
    pub error: String,
    /// When the write gave up
    pub failed_at: DateTime<Utc>,
}

/// Bounded buffer of failed snapshots.
///
/// Oldest entries are evicted when the buffer is full; a dropped dead letter
/// for an open window is superseded by that window's next emission anyway.
#[derive(Debug)]
pub struct DeadLetterBuffer<R> {
    capacity: usize,
    entries: tokio::sync::Mutex<VecDeque<DeadLetter<R>>>,
}

impl<R> DeadLetterBuffer<R> {
    /// Create a buffer holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: tokio::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// Park a failed snapshot, evicting the oldest entry when full
    pub async fn push(&self, letter: DeadLetter<R>) {
        let mut entries = self.entries.lock().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(letter);
    }

    /// Number of parked snapshots
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the buffer is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Take every parked snapshot, oldest first
    pub async fn drain(&self) -> Vec<DeadLetter<R>> {
        let mut entries = self.entries.lock().await;
        entries.drain(..).collect()
    }
}
