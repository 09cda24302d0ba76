// Copyright 2025 Cowboy AI, LLC.

//! Durable store for lineage audit records
//!
//! Lineage records are the only entity in the pipeline with
//! concurrent-writer semantics: several stages may race to merge steps into
//! the same record. Writes therefore go through
//! [`LineageRecord::merge`] rather than a plain overwrite; the JetStream
//! implementation retries on a compare-and-swap revision conflict until one
//! writer's merge lands on top of the other's.

use crate::lineage::{LineageId, LineageRecord};
use async_nats::jetstream::kv::Store as KvStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const MAX_CAS_ATTEMPTS: usize = 5;

/// Errors from the lineage store
#[derive(Debug, Error)]
pub enum LineageStoreError {
    /// Underlying storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Concurrent writers kept invalidating the compare-and-swap
    #[error("Merge conflict not resolved after {0} attempts")]
    ConflictRetriesExhausted(usize),
}

/// Store of one audit record per lineage id, with merge-on-conflict writes
#[async_trait]
pub trait LineageStore: Send + Sync {
    /// Write the record, merging into any existing record for the same
    /// lineage id
    async fn record(&self, record: LineageRecord) -> Result<(), LineageStoreError>;

    /// Look up a record by lineage id
    async fn get(&self, lineage_id: LineageId) -> Result<Option<LineageRecord>, LineageStoreError>;
}

/// In-memory lineage store for tests and demos
pub struct InMemoryLineageStore {
    records: Arc<tokio::sync::RwLock<HashMap<LineageId, LineageRecord>>>,
}

impl InMemoryLineageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    /// Number of records currently stored
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryLineageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryLineageStore {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

#[async_trait]
impl LineageStore for InMemoryLineageStore {
    async fn record(&self, record: LineageRecord) -> Result<(), LineageStoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.lineage_id) {
            Some(existing) => existing
                .merge(&record)
                .map_err(|e| LineageStoreError::Storage(e.to_string()))?,
            None => {
                records.insert(record.lineage_id, record);
            }
        }
        Ok(())
    }

    async fn get(&self, lineage_id: LineageId) -> Result<Option<LineageRecord>, LineageStoreError> {
        let records = self.records.read().await;
        Ok(records.get(&lineage_id).cloned())
    }
}

/// JetStream KV lineage store
pub struct JetStreamLineageStore {
    kv_store: Arc<KvStore>,
}

impl JetStreamLineageStore {
    /// Wrap an existing KV bucket
    pub fn new(kv_store: KvStore) -> Self {
        Self {
            kv_store: Arc::new(kv_store),
        }
    }
}

#[async_trait]
impl LineageStore for JetStreamLineageStore {
    async fn record(&self, record: LineageRecord) -> Result<(), LineageStoreError> {
        let key = record.lineage_id.to_string();

        for attempt in 0..MAX_CAS_ATTEMPTS {
            let entry = self
                .kv_store
                .entry(&key)
                .await
                .map_err(|e| LineageStoreError::Storage(e.to_string()))?;

            match entry {
                Some(existing_entry) => {
                    let mut existing: LineageRecord =
                        serde_json::from_slice(&existing_entry.value)?;
                    existing
                        .merge(&record)
                        .map_err(|e| LineageStoreError::Storage(e.to_string()))?;
                    let value = serde_json::to_vec(&existing)?;

                    match self
                        .kv_store
                        .update(&key, value.into(), existing_entry.revision)
                        .await
                    {
                        Ok(_) => return Ok(()),
                        Err(e) => {
                            // Another writer landed first; re-read and merge again
                            debug!(
                                lineage_id = %record.lineage_id,
                                attempt,
                                "Lineage CAS conflict: {e}"
                            );
                        }
                    }
                }
                None => {
                    let value = serde_json::to_vec(&record)?;
                    match self.kv_store.create(&key, value.into()).await {
                        Ok(_) => return Ok(()),
                        Err(e) => {
                            // Lost the creation race; retry as a merge
                            debug!(
                                lineage_id = %record.lineage_id,
                                attempt,
                                "Lineage create conflict: {e}"
                            );
                        }
                    }
                }
            }
        }

        Err(LineageStoreError::ConflictRetriesExhausted(MAX_CAS_ATTEMPTS))
    }

    async fn get(&self, lineage_id: LineageId) -> Result<Option<LineageRecord>, LineageStoreError> {
        match self
            .kv_store
            .get(lineage_id.to_string())
            .await
            .map_err(|e| LineageStoreError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
