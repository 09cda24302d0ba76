// Copyright 2025 Cowboy AI, LLC.

//! Lineage recorder
//!
//! Independently consumes the same raw per-source streams as the
//! aggregators and maintains one audit record per lineage id. Correlation
//! metadata is resolved from the transport headers first, falling back to
//! the canonical event body when a header did not survive a hop; records
//! that resolve to no lineage id at all are skipped with a counter, never
//! an abort.

use crate::errors::PipelineResult;
use crate::infrastructure::{CheckpointStore, LineageStore, SourceCheckpoint};
use crate::lineage::{LineageRecord, ResolvedLineage, TransformationStep};
use crate::metrics::PipelineMetrics;
use crate::router::SaleRecord;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Stage name the recorder observes events at
pub const INGESTION_STAGE: &str = "ingestion";

/// Outcome counters for one recorder run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Records pulled off the raw streams
    pub records_seen: u64,
    /// Audit records written or merged
    pub records_written: u64,
    /// Records skipped because no lineage id could be resolved
    pub records_skipped: u64,
}

/// Audit-trail worker over the raw source streams
pub struct LineageRecorder {
    name: String,
    stage: String,
    store: Arc<dyn LineageStore>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    metrics: Arc<PipelineMetrics>,
    shutdown: watch::Receiver<bool>,
}

impl LineageRecorder {
    /// Create a recorder observing events at the default ingestion stage
    pub fn new(
        store: Arc<dyn LineageStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        metrics: Arc<PipelineMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self::at_stage(INGESTION_STAGE, store, checkpoint_store, metrics, shutdown)
    }

    /// Create a recorder observing events at a named stage.
    ///
    /// Records from different stages for the same lineage id merge into one
    /// audit row with one step entry per stage.
    pub fn at_stage(
        stage: impl Into<String>,
        store: Arc<dyn LineageStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        metrics: Arc<PipelineMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let stage = stage.into();
        Self {
            name: format!("lineage-recorder-{stage}"),
            stage,
            store,
            checkpoint_store,
            metrics,
            shutdown,
        }
    }

    /// Drive the recorder until the input ends or shutdown is signalled
    pub async fn run(
        self,
        mut input: impl Stream<Item = SaleRecord> + Unpin,
    ) -> PipelineResult<RecorderStats> {
        let mut checkpoint = self
            .checkpoint_store
            .load(&self.name)
            .await?
            .unwrap_or_else(|| SourceCheckpoint::new(&self.name));
        let mut stats = RecorderStats::default();
        let mut shutdown = self.shutdown.clone();

        info!(worker = %self.name, "Lineage recorder started");

        loop {
            let next = tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(worker = %self.name, "Shutdown requested, stopping intake");
                        None
                    } else {
                        continue;
                    }
                }

                maybe_record = input.next() => maybe_record,
            };

            let Some(record) = next else { break };
            self.handle_record(record, &mut checkpoint, &mut stats).await;
        }

        if let Err(e) = self.checkpoint_store.save(&checkpoint).await {
            warn!(worker = %self.name, "Failed to flush checkpoint on shutdown: {e}");
        }
        info!(
            worker = %self.name,
            records_written = stats.records_written,
            records_skipped = stats.records_skipped,
            "Lineage recorder stopped"
        );
        Ok(stats)
    }

    async fn handle_record(
        &self,
        record: SaleRecord,
        checkpoint: &mut SourceCheckpoint,
        stats: &mut RecorderStats,
    ) {
        stats.records_seen += 1;
        let resolved = ResolvedLineage::from_headers(&record.headers);

        // Headers win; the event body backfills anything a hop lost
        let Some(lineage_id) = resolved.lineage_id.or(record.event.lineage_id) else {
            self.metrics.record_lineage_skipped();
            stats.records_skipped += 1;
            checkpoint.record_error(format!(
                "no lineage id for sale {} at {}",
                record.event.sale_id, record.position
            ));
            warn!(
                worker = %self.name,
                sale_id = %record.event.sale_id,
                position = %record.position,
                "Skipping record without lineage id"
            );
            return;
        };
        let source_system = resolved
            .source_system
            .unwrap_or(record.event.source_system);
        let source_timestamp = resolved.source_timestamp.unwrap_or(record.event.timestamp);
        let ingestion_timestamp = resolved
            .ingestion_timestamp
            .unwrap_or(record.event.ingestion_timestamp);

        let step = TransformationStep {
            stage: self.stage.clone(),
            topic: record.position.topic.clone(),
            partition: record.position.partition,
            offset: record.position.offset,
            recorded_at: Utc::now(),
        };
        let audit = LineageRecord::new(
            lineage_id,
            record.event.sale_id.clone(),
            source_system,
            source_timestamp,
            ingestion_timestamp,
            step,
        );

        match self.store.record(audit).await {
            Ok(()) => {
                self.metrics.record_lineage_written();
                stats.records_written += 1;
                checkpoint.advance(&record.position.topic, record.position.offset);
                debug!(
                    worker = %self.name,
                    lineage_id = %lineage_id,
                    sale_id = %record.event.sale_id,
                    "Tracked lineage"
                );
            }
            Err(e) => {
                // Contained per record: a lineage gap, not a crash
                checkpoint.record_error(e.to_string());
                warn!(
                    worker = %self.name,
                    lineage_id = %lineage_id,
                    "Failed to write lineage record: {e}"
                );
            }
        }
    }
}
