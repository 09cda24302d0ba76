// Copyright 2025 Cowboy AI, LLC.

//! Pipeline metrics
//!
//! An explicit metrics context constructed at startup and handed to each
//! component, replacing any process-wide registry. Lifecycle: create before
//! workers start, share via `Arc`, call [`PipelineMetrics::flush`] on
//! shutdown to log the final snapshot.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Shared counters for every pipeline component
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    events_processed: AtomicU64,
    events_malformed: AtomicU64,
    events_late: AtomicU64,
    snapshots_emitted: AtomicU64,
    sink_failures: AtomicU64,
    sink_dead_letters: AtomicU64,
    lineage_records_written: AtomicU64,
    lineage_skipped: AtomicU64,
    duplicates_dropped: AtomicU64,
}

impl PipelineMetrics {
    /// Create a fresh metrics context
    pub fn new() -> Self {
        Self::default()
    }

    /// An event was folded into aggregate state
    pub fn record_event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// An event failed decoding or validation and was dropped
    pub fn record_event_malformed(&self) {
        self.events_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// An event arrived for an already-closed window and was dropped
    pub fn record_event_late(&self) {
        self.events_late.fetch_add(1, Ordering::Relaxed);
    }

    /// A refined snapshot was emitted downstream
    pub fn record_snapshot_emitted(&self) {
        self.snapshots_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A sink write failed (after exhausting its retry budget)
    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A snapshot was parked in the dead-letter buffer
    pub fn record_sink_dead_letter(&self) {
        self.sink_dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    /// A lineage record was written or merged
    pub fn record_lineage_written(&self) {
        self.lineage_records_written.fetch_add(1, Ordering::Relaxed);
    }

    /// A record could not be resolved to a lineage id and was skipped
    pub fn record_lineage_skipped(&self) {
        self.lineage_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A duplicate business key was rejected by the dedup store
    pub fn record_duplicate_dropped(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            events_late: self.events_late.load(Ordering::Relaxed),
            snapshots_emitted: self.snapshots_emitted.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            sink_dead_letters: self.sink_dead_letters.load(Ordering::Relaxed),
            lineage_records_written: self.lineage_records_written.load(Ordering::Relaxed),
            lineage_skipped: self.lineage_skipped.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
        }
    }

    /// Log the final snapshot; called once on shutdown
    pub fn flush(&self) {
        let snapshot = self.snapshot();
        info!(
            events_processed = snapshot.events_processed,
            events_malformed = snapshot.events_malformed,
            events_late = snapshot.events_late,
            snapshots_emitted = snapshot.snapshots_emitted,
            sink_failures = snapshot.sink_failures,
            sink_dead_letters = snapshot.sink_dead_letters,
            lineage_records_written = snapshot.lineage_records_written,
            lineage_skipped = snapshot.lineage_skipped,
            duplicates_dropped = snapshot.duplicates_dropped,
            "Pipeline metrics"
        );
    }
}

/// Serializable view of the pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Events folded into aggregate state
    pub events_processed: u64,
    /// Events dropped as malformed
    pub events_malformed: u64,
    /// Events dropped as late
    pub events_late: u64,
    /// Snapshots emitted downstream
    pub snapshots_emitted: u64,
    /// Sink writes that failed after retries
    pub sink_failures: u64,
    /// Snapshots parked in the dead-letter buffer
    pub sink_dead_letters: u64,
    /// Lineage records written or merged
    pub lineage_records_written: u64,
    /// Records skipped by the lineage recorder
    pub lineage_skipped: u64,
    /// Duplicates rejected by the dedup store
    pub duplicates_dropped: u64,
}
