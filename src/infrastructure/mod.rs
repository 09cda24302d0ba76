// Copyright 2025 Cowboy AI, LLC.

//! Infrastructure layer for the sales pipeline
//!
//! This module contains all infrastructure concerns including:
//! - NATS client and JetStream stream/bucket provisioning
//! - Upsert sinks for aggregate snapshots
//! - Lineage record storage with merge-on-conflict writes
//! - Processing-position checkpoints

pub mod checkpoint;
pub mod lineage_store;
pub mod nats_client;
pub mod sink;

pub use checkpoint::{
    CheckpointError, CheckpointStore, InMemoryCheckpointStore, JetStreamCheckpointStore,
    SourceCheckpoint,
};
pub use lineage_store::{
    InMemoryLineageStore, JetStreamLineageStore, LineageStore, LineageStoreError,
};
pub use nats_client::{spawn_raw_reader, NatsConfig, NatsError, PipelineNats, SALES_RAW_STREAM};
pub use sink::{
    DeadLetter, DeadLetterBuffer, InMemoryUpsertSink, JetStreamKvSink, SinkError, UpsertSink,
};
