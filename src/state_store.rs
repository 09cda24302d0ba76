// Copyright 2025 Cowboy AI, LLC.

//! Explicit window-state store
//!
//! Aggregate state lives in an in-memory arena indexed by
//! (dimension key, window start) rather than inside a managed streams
//! runtime. Each arena is exclusively owned by one aggregator instance; the
//! pluggable [`StatePersistence`] backend only sees state at the recovery
//! points (window close, shutdown).
//!
//! Per-window lifecycle: absent → accumulating → closed. A closed window
//! never accepts another event; its physical state is retained for fault
//! recovery until the arena is dropped.

use crate::aggregates::WindowAggregate;
use crate::window::WindowBounds;
use async_nats::jetstream::kv::Store as KvStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::StreamExt;
use tracing::debug;

/// Errors from the state persistence backend
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// Underlying storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle phase of one (key, window) state entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowPhase {
    /// The window is open and folding events
    Accumulating,
    /// The window boundary has passed; state is immutable
    Closed,
}

/// One (key, window) entry in the arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowState<A> {
    /// Current lifecycle phase
    pub phase: WindowPhase,
    /// The accumulated aggregate
    pub aggregate: A,
}

/// In-memory arena of window states for one aggregator instance
#[derive(Debug)]
pub struct StateArena<A: WindowAggregate> {
    states: HashMap<(String, i64), WindowState<A>>,
    // Open windows ordered by end boundary, for watermark-driven closing
    open: BTreeSet<(i64, String, i64)>,
}

impl<A: WindowAggregate> StateArena<A> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            open: BTreeSet::new(),
        }
    }

    /// Rebuild an arena from recovered states
    pub fn from_states(states: Vec<WindowState<A>>) -> Self {
        let mut arena = Self::new();
        for state in states {
            let key = state.aggregate.key().to_string();
            let bounds = state.aggregate.bounds();
            if state.phase == WindowPhase::Accumulating {
                arena.open.insert((bounds.end, key.clone(), bounds.start));
            }
            arena.states.insert((key, bounds.start), state);
        }
        arena
    }

    /// Current phase of a (key, window) entry; `None` when absent
    pub fn phase(&self, key: &str, window_start: i64) -> Option<WindowPhase> {
        self.states
            .get(&(key.to_string(), window_start))
            .map(|state| state.phase)
    }

    /// Fold one event into the (key, window) state, creating it on first
    /// contact, and return a snapshot of the updated aggregate.
    ///
    /// Callers must have already ruled out closed windows; folding into a
    /// closed entry is an invariant violation and panics in debug builds.
    pub fn apply(&mut self, key: &str, bounds: WindowBounds, event: &crate::events::SaleEvent) -> A {
        let entry = self
            .states
            .entry((key.to_string(), bounds.start))
            .or_insert_with(|| {
                self.open.insert((bounds.end, key.to_string(), bounds.start));
                WindowState {
                    phase: WindowPhase::Accumulating,
                    aggregate: A::new(key, bounds),
                }
            });
        debug_assert_eq!(entry.phase, WindowPhase::Accumulating);
        entry.aggregate.apply(event);
        entry.aggregate.clone()
    }

    /// Close every open window whose end boundary is at or before the
    /// watermark, returning the now-immutable states for persistence.
    pub fn close_before(&mut self, watermark_millis: i64) -> Vec<WindowState<A>> {
        let mut closed = Vec::new();
        while let Some(entry) = self.open.first() {
            if entry.0 > watermark_millis {
                break;
            }
            let (_, key, start) = self.open.pop_first().expect("checked non-empty");
            if let Some(state) = self.states.get_mut(&(key.clone(), start)) {
                state.phase = WindowPhase::Closed;
                closed.push(state.clone());
                debug!(
                    dimension = A::DIMENSION,
                    key = %key,
                    window_start = start,
                    "Window closed"
                );
            }
        }
        closed
    }

    /// Snapshot every still-open window, for shutdown persistence
    pub fn open_states(&self) -> Vec<WindowState<A>> {
        self.open
            .iter()
            .filter_map(|(_, key, start)| self.states.get(&(key.clone(), *start)).cloned())
            .collect()
    }

    /// Look up one entry
    pub fn get(&self, key: &str, window_start: i64) -> Option<&WindowState<A>> {
        self.states.get(&(key.to_string(), window_start))
    }

    /// Total number of entries, open and closed
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the arena holds no state
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Number of currently open windows
    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

impl<A: WindowAggregate> Default for StateArena<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pluggable persistence backend for recovery snapshots
#[async_trait]
pub trait StatePersistence<A: WindowAggregate>: Send + Sync {
    /// Persist one window state
    async fn persist(&self, state: &WindowState<A>) -> Result<(), StateStoreError>;

    /// Load every persisted window state
    async fn load_all(&self) -> Result<Vec<WindowState<A>>, StateStoreError>;
}

/// In-memory persistence, for tests and single-process runs
pub struct InMemoryStatePersistence<A> {
    states: Arc<tokio::sync::RwLock<HashMap<(String, i64), WindowState<A>>>>,
}

impl<A> InMemoryStatePersistence<A> {
    /// Create an empty backend
    pub fn new() -> Self {
        Self {
            states: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }
}

impl<A> Default for InMemoryStatePersistence<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for InMemoryStatePersistence<A> {
    fn clone(&self) -> Self {
        Self {
            states: Arc::clone(&self.states),
        }
    }
}

#[async_trait]
impl<A: WindowAggregate> StatePersistence<A> for InMemoryStatePersistence<A> {
    async fn persist(&self, state: &WindowState<A>) -> Result<(), StateStoreError> {
        let mut states = self.states.write().await;
        states.insert(
            (state.aggregate.key().to_string(), state.aggregate.bounds().start),
            state.clone(),
        );
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<WindowState<A>>, StateStoreError> {
        let states = self.states.read().await;
        Ok(states.values().cloned().collect())
    }
}

/// JetStream KV persistence for recovery across restarts
pub struct JetStreamStatePersistence {
    kv_store: Arc<KvStore>,
}

impl JetStreamStatePersistence {
    /// Wrap an existing KV bucket
    pub fn new(kv_store: KvStore) -> Self {
        Self {
            kv_store: Arc::new(kv_store),
        }
    }

    fn entry_key<A: WindowAggregate>(state: &WindowState<A>) -> String {
        format!(
            "{}.{}.{}",
            A::DIMENSION,
            sanitize_key(state.aggregate.key()),
            state.aggregate.bounds().start
        )
    }
}

/// Replace characters JetStream KV keys cannot carry (spaces, punctuation in
/// city names) with underscores
pub(crate) fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl<A: WindowAggregate> StatePersistence<A> for JetStreamStatePersistence {
    async fn persist(&self, state: &WindowState<A>) -> Result<(), StateStoreError> {
        let key = Self::entry_key(state);
        let value = serde_json::to_vec(state)?;
        self.kv_store
            .put(&key, value.into())
            .await
            .map_err(|e| StateStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<WindowState<A>>, StateStoreError> {
        let mut states = Vec::new();
        let mut keys = self
            .kv_store
            .keys()
            .await
            .map_err(|e| StateStoreError::Storage(e.to_string()))?;

        let prefix = format!("{}.", A::DIMENSION);
        while let Some(key) = keys.next().await {
            let key = key.map_err(|e| StateStoreError::Storage(e.to_string()))?;
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Some(entry) = self
                .kv_store
                .get(&key)
                .await
                .map_err(|e| StateStoreError::Storage(e.to_string()))?
            {
                states.push(serde_json::from_slice(&entry)?);
            }
        }
        Ok(states)
    }
}
