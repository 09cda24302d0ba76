// Copyright 2025 Cowboy AI, LLC.

//! Windowed aggregation engine
//!
//! One engine instance per dimension folds the merged event stream into
//! per-(key, window) state and emits the full accumulated snapshot on every
//! contributing event (continuous refinement). Window close is driven by an
//! event-time watermark: the highest event time the instance has observed.
//! A window whose end is at or before the watermark is closed and never
//! re-opened; events for it are dropped as late.
//!
//! Per-event failures (malformed payloads, missing keys) are contained
//! here: the event is dropped, a counter is incremented, and every other
//! key's state is untouched.

use crate::aggregates::WindowAggregate;
use crate::events::SaleEvent;
use crate::metrics::PipelineMetrics;
use crate::state_store::{StateArena, WindowState};
use crate::window::TumblingWindows;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of folding one event
#[derive(Debug)]
pub struct ProcessOutcome<A: WindowAggregate> {
    /// Refined snapshot to upsert downstream, absent when the event was
    /// dropped
    pub emission: Option<A>,
    /// Windows the watermark advance just closed; callers persist these for
    /// recovery
    pub closed: Vec<WindowState<A>>,
}

impl<A: WindowAggregate> ProcessOutcome<A> {
    fn dropped() -> Self {
        Self {
            emission: None,
            closed: Vec::new(),
        }
    }
}

/// Per-dimension aggregation engine.
///
/// Owns its [`StateArena`] exclusively; processing is strictly sequential
/// per instance, so no window's state is ever mutated concurrently.
pub struct WindowedAggregator<A: WindowAggregate> {
    windows: TumblingWindows,
    arena: StateArena<A>,
    stream_time: Option<i64>,
    metrics: Arc<PipelineMetrics>,
}

impl<A: WindowAggregate> WindowedAggregator<A> {
    /// Create an engine with an empty arena
    pub fn new(windows: TumblingWindows, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            windows,
            arena: StateArena::new(),
            stream_time: None,
            metrics,
        }
    }

    /// Create an engine from recovered window states
    pub fn with_recovered_state(
        windows: TumblingWindows,
        metrics: Arc<PipelineMetrics>,
        states: Vec<WindowState<A>>,
    ) -> Self {
        // The watermark resumes at the highest closed boundary so replayed
        // late events stay dropped after a restart
        let stream_time = states
            .iter()
            .filter(|state| state.phase == crate::state_store::WindowPhase::Closed)
            .map(|state| state.aggregate.bounds().end)
            .max();
        Self {
            windows,
            arena: StateArena::from_states(states),
            stream_time,
            metrics,
        }
    }

    /// Fold one event into the engine.
    ///
    /// Returns the refined snapshot for the event's (key, window) pair, or
    /// no emission when the event was malformed or late.
    pub fn process(&mut self, event: &SaleEvent) -> ProcessOutcome<A> {
        if let Err(e) = event.validate() {
            self.metrics.record_event_malformed();
            warn!(
                dimension = A::DIMENSION,
                lineage_id = ?event.lineage_id,
                sale_id = %event.sale_id,
                "Dropping malformed event: {e}"
            );
            return ProcessOutcome::dropped();
        }

        let Some(key) = A::dimension_key(event) else {
            self.metrics.record_event_malformed();
            warn!(
                dimension = A::DIMENSION,
                lineage_id = ?event.lineage_id,
                sale_id = %event.sale_id,
                "Dropping event without a dimension key"
            );
            return ProcessOutcome::dropped();
        };

        let bounds = self.windows.window_for(event.timestamp);

        if let Some(watermark) = self.stream_time {
            if bounds.end <= watermark {
                self.metrics.record_event_late();
                debug!(
                    dimension = A::DIMENSION,
                    key = %key,
                    window_start = bounds.start,
                    watermark,
                    "Dropping late event for closed window"
                );
                return ProcessOutcome::dropped();
            }
        }

        let snapshot = self.arena.apply(&key, bounds, event);
        self.metrics.record_event_processed();

        let event_millis = event.timestamp.timestamp_millis();
        let watermark = match self.stream_time {
            Some(current) => current.max(event_millis),
            None => event_millis,
        };
        self.stream_time = Some(watermark);
        let closed = self.arena.close_before(watermark);

        self.metrics.record_snapshot_emitted();
        ProcessOutcome {
            emission: Some(snapshot),
            closed,
        }
    }

    /// Current event-time watermark (epoch milliseconds)
    pub fn stream_time(&self) -> Option<i64> {
        self.stream_time
    }

    /// Snapshot of every still-open window, for shutdown persistence
    pub fn open_states(&self) -> Vec<WindowState<A>> {
        self.arena.open_states()
    }

    /// The arena backing this engine
    pub fn arena(&self) -> &StateArena<A> {
        &self.arena
    }
}
