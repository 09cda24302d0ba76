// Copyright 2025 Cowboy AI, LLC.

//! # CIM Sales Pipeline
//!
//! Streaming sales analytics: three independently-paced sources (database
//! change capture, file drops, a polled remote service) are normalized into
//! one canonical event shape, merged into a single keyed stream, and rolled
//! up over tumbling one-hour windows along two independent dimensions
//! (city, salesperson). Snapshots are upserted idempotently; a parallel
//! lineage recorder keeps an auditable trail per business key.
//!
//! The crate provides the building blocks as composable pieces:
//! - **Canonical events**: one immutable, source-agnostic record per sale
//! - **Lineage propagation**: a correlation id minted once and carried
//!   unchanged on transport headers through every hop
//! - **Merge & routing**: three source channels unioned into one stream,
//!   re-keyed per aggregation dimension
//! - **Windowed aggregation**: per-(key, window) state with continuous
//!   snapshot refinement and watermark-driven close
//! - **Upsert sinks**: idempotent last-write-wins tables keyed by
//!   (dimension key, window start)
//! - **Lineage recording**: merge-on-conflict audit rows safe under
//!   concurrent writers
//!
//! ## Design Principles
//!
//! 1. **Containment**: per-event failures never cross keys or windows
//! 2. **Continuous refinement**: every emission is full state, never a delta
//! 3. **Idempotence**: sinks and stores tolerate replayed delivery
//! 4. **Explicit state**: window state lives in an owned arena with a
//!    pluggable recovery backend, not inside a managed runtime
//! 5. **Explicit lifecycles**: metrics and checkpoints are created at
//!    startup and flushed on shutdown

#![warn(missing_docs)]

mod aggregates;
mod aggregator;
mod config;
mod dedup;
mod errors;
mod events;
mod metrics;
mod producer;
mod recorder;
mod router;
mod state_store;
mod topology;
mod window;
pub mod infrastructure;
pub mod lineage;

// Re-export core types
pub use aggregates::{
    CitySalesAggregate, CitySalesRow, SalesmanAggregate, SalesmanStatsRow, WindowAggregate,
};
pub use aggregator::{ProcessOutcome, WindowedAggregator};
pub use config::PipelineConfig;
pub use dedup::{DedupStore, DEFAULT_DEDUP_CAPACITY};
pub use errors::{PipelineError, PipelineResult};
pub use events::{SaleEvent, SourceSystem};
pub use lineage::{LineageId, LineageRecord, ResolvedLineage, TransformationStep};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use producer::{canonicalize, ChannelEventPublisher, EventPublisher, JetStreamEventPublisher};
pub use recorder::{LineageRecorder, RecorderStats, INGESTION_STAGE};
pub use router::{merge_sources, SaleRecord, StreamPosition};
pub use state_store::{
    InMemoryStatePersistence, JetStreamStatePersistence, StateArena, StatePersistence,
    StateStoreError, WindowPhase, WindowState,
};
pub use topology::{SinkRetryPolicy, TopologyStats, TopologyWorker};
pub use window::{TumblingWindows, WindowBounds};
