// Copyright 2025 Cowboy AI, LLC.

//! Per-dimension topology workers
//!
//! A topology worker owns one aggregation engine and drives it from the
//! merged source stream: fold, persist closed windows, upsert the refined
//! snapshot. Both dimension topologies run independently over the same
//! merged input.
//!
//! Shutdown contract: on signal the worker stops intake, finishes the
//! record already in flight, persists every open window for recovery and
//! flushes its processing-position checkpoint. No in-flight event is
//! silently dropped.
//!
//! Sink failures never abort the worker. Retryable errors get a bounded
//! retry budget; a snapshot that exhausts it is parked in the dead-letter
//! buffer and superseded by the window's next emission.

use crate::aggregates::WindowAggregate;
use crate::aggregator::WindowedAggregator;
use crate::errors::PipelineResult;
use crate::infrastructure::{
    CheckpointStore, DeadLetter, DeadLetterBuffer, SourceCheckpoint, UpsertSink,
};
use crate::metrics::PipelineMetrics;
use crate::router::SaleRecord;
use crate::state_store::StatePersistence;
use crate::window::WindowBounds;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

/// Retry policy for retryable sink failures
#[derive(Debug, Clone, Copy)]
pub struct SinkRetryPolicy {
    /// How many times to retry after the first failure
    pub attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for SinkRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Outcome counters for one worker run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyStats {
    /// Records pulled off the merged stream
    pub records_seen: u64,
    /// Snapshots successfully upserted
    pub snapshots_upserted: u64,
    /// Snapshots that exhausted the retry budget
    pub dead_letters: u64,
    /// Records skipped because their offset was already checkpointed
    pub replayed_skipped: u64,
}

/// One dimension's aggregation worker
pub struct TopologyWorker<A: WindowAggregate> {
    name: String,
    aggregator: WindowedAggregator<A>,
    sink: Arc<dyn UpsertSink<A::Row>>,
    state_backend: Arc<dyn StatePersistence<A>>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    dead_letters: Arc<DeadLetterBuffer<A::Row>>,
    metrics: Arc<PipelineMetrics>,
    retry: SinkRetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl<A: WindowAggregate> TopologyWorker<A> {
    /// Conventional worker name for this dimension
    pub fn worker_name() -> String {
        format!("aggregator-{}", A::DIMENSION)
    }

    /// Assemble a worker around an engine and its stores
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        aggregator: WindowedAggregator<A>,
        sink: Arc<dyn UpsertSink<A::Row>>,
        state_backend: Arc<dyn StatePersistence<A>>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        dead_letters: Arc<DeadLetterBuffer<A::Row>>,
        metrics: Arc<PipelineMetrics>,
        retry: SinkRetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: Self::worker_name(),
            aggregator,
            sink,
            state_backend,
            checkpoint_store,
            dead_letters,
            metrics,
            retry,
            shutdown,
        }
    }

    /// Drive the worker until the input ends or shutdown is signalled
    pub async fn run(
        mut self,
        mut input: impl Stream<Item = SaleRecord> + Unpin,
    ) -> PipelineResult<TopologyStats> {
        let mut checkpoint = self
            .checkpoint_store
            .load(&self.name)
            .await?
            .unwrap_or_else(|| SourceCheckpoint::new(&self.name));
        let mut stats = TopologyStats::default();
        let mut shutdown = self.shutdown.clone();

        info!(worker = %self.name, "Topology worker started");

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

            match next {
                Some(record) => {
                    // The record already pulled is always processed to
                    // completion, even when shutdown races it
                    self.handle_record(record, &mut checkpoint, &mut stats).await;
                }
                None => {
                    debug!(worker = %self.name, "Input ended or shutdown requested");
                    break;
                }
            }
        }

        self.finish(&checkpoint).await;
        Ok(stats)
    }

    async fn handle_record(
        &mut self,
        record: SaleRecord,
        checkpoint: &mut SourceCheckpoint,
        stats: &mut TopologyStats,
    ) {
        stats.records_seen += 1;

        // Offsets at or below the checkpoint were folded in a previous run
        // whose state we recovered; replaying them would double-count.
        if let Some(position) = checkpoint.position(&record.position.topic) {
            if record.position.offset <= position {
                stats.replayed_skipped += 1;
                debug!(
                    worker = %self.name,
                    position = %record.position,
                    "Skipping already-checkpointed record"
                );
                return;
            }
        }

        let outcome = self.aggregator.process(&record.event);
        checkpoint.advance(&record.position.topic, record.position.offset);

        for state in &outcome.closed {
            if let Err(e) = self.state_backend.persist(state).await {
                // Recovery snapshot only; the in-memory state is intact
                warn!(
                    worker = %self.name,
                    key = state.aggregate.key(),
                    window_start = state.aggregate.bounds().start,
                    "Failed to persist closed window: {e}"
                );
            }
        }

        if let Some(snapshot) = outcome.emission {
            let key = snapshot.key().to_string();
            let bounds = snapshot.bounds();
            let row = snapshot.to_row();
            self.upsert_with_retry(&key, bounds, row, checkpoint, stats)
                .await;
        }
    }

    async fn upsert_with_retry(
        &self,
        key: &str,
        bounds: WindowBounds,
        row: A::Row,
        checkpoint: &mut SourceCheckpoint,
        stats: &mut TopologyStats,
    ) {
        let mut attempt = 0;
        loop {
            match self.sink.upsert(key, bounds, &row).await {
                Ok(()) => {
                    stats.snapshots_upserted += 1;
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    attempt += 1;
                    warn!(
                        worker = %self.name,
                        table = self.sink.table(),
                        key = %key,
                        attempt,
                        "Retrying sink write: {e}"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => {
                    error!(
                        worker = %self.name,
                        table = self.sink.table(),
                        key = %key,
                        window_start = bounds.start,
                        "Sink write failed, dead-lettering snapshot: {e}"
                    );
                    self.metrics.record_sink_failure();
                    checkpoint.record_error(e.to_string());
                    self.dead_letters
                        .push(DeadLetter {
                            key: key.to_string(),
                            bounds,
                            row,
                            error: e.to_string(),
                            failed_at: Utc::now(),
                        })
                        .await;
                    self.metrics.record_sink_dead_letter();
                    stats.dead_letters += 1;
                    return;
                }
            }
        }
    }

    /// Persist open windows and flush the checkpoint; part of every
    /// shutdown path
    async fn finish(&self, checkpoint: &SourceCheckpoint) {
        for state in self.aggregator.open_states() {
            if let Err(e) = self.state_backend.persist(&state).await {
                warn!(
                    worker = %self.name,
                    key = state.aggregate.key(),
                    "Failed to persist open window on shutdown: {e}"
                );
            }
        }
        if let Err(e) = self.checkpoint_store.save(checkpoint).await {
            error!(worker = %self.name, "Failed to flush checkpoint on shutdown: {e}");
        }
        info!(
            worker = %self.name,
            events_processed = checkpoint.events_processed,
            "Topology worker stopped"
        );
    }
}
