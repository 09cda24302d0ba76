// Copyright 2025 Cowboy AI, LLC.

//! Connector boundary: canonicalization and publication
//!
//! Connector internals (change-capture decoding, directory watching, remote
//! polling) stay outside this crate. Their contract is here: hand a
//! normalized [`SaleEvent`] to a per-source publisher, which stamps the
//! canonicalization fields exactly once and publishes the event with its
//! correlation headers to the source's raw subject.

use crate::errors::{PipelineError, PipelineResult};
use crate::events::{SaleEvent, SourceSystem};
use crate::infrastructure::PipelineNats;
use crate::lineage;
use crate::router::SaleRecord;
use async_nats::HeaderMap;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::info;

/// Stamp the canonicalization fields on a freshly normalized event.
///
/// A lineage id is minted only when the event does not carry one yet; the
/// ingestion timestamp and source system are set at the same moment. An
/// already-canonical event passes through unchanged, so no downstream stage
/// can ever re-mint an id.
pub fn canonicalize(mut event: SaleEvent, source_system: SourceSystem) -> SaleEvent {
    if event.lineage_id.is_none() {
        event.lineage_id = Some(lineage::generate());
        event.source_system = source_system;
        event.ingestion_timestamp = Utc::now();
    }
    event
}

/// Publishes canonical events for one source
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// The source this publisher belongs to
    fn source(&self) -> SourceSystem;

    /// Canonicalize and publish one event with its lineage headers
    async fn publish(&self, event: SaleEvent) -> PipelineResult<()>;
}

/// Publisher backed by the JetStream transport
pub struct JetStreamEventPublisher {
    nats: PipelineNats,
    source: SourceSystem,
}

impl JetStreamEventPublisher {
    /// Create a publisher for the given source
    pub fn new(nats: PipelineNats, source: SourceSystem) -> Self {
        Self { nats, source }
    }
}

#[async_trait]
impl EventPublisher for JetStreamEventPublisher {
    fn source(&self) -> SourceSystem {
        self.source
    }

    async fn publish(&self, event: SaleEvent) -> PipelineResult<()> {
        let event = canonicalize(event, self.source);
        let lineage_id = event
            .lineage_id
            .expect("canonicalize always stamps a lineage id");

        let mut headers = HeaderMap::new();
        lineage::attach(&mut headers, lineage_id, event.source_system, event.timestamp);

        let payload = serde_json::to_vec(&event)?;
        self.nats
            .publish_with_headers(self.source.subject(), headers, payload)
            .await?;

        info!(
            source = %self.source,
            sale_id = %event.sale_id,
            lineage_id = %lineage_id,
            "Published sale event"
        );
        Ok(())
    }
}

/// Publisher backed by an in-process channel, for tests and demos.
///
/// Assigns offsets the way the broker would: monotonically per source.
pub struct ChannelEventPublisher {
    source: SourceSystem,
    sender: mpsc::Sender<SaleRecord>,
    next_offset: AtomicU64,
}

impl ChannelEventPublisher {
    /// Create a publisher feeding the given channel
    pub fn new(source: SourceSystem, sender: mpsc::Sender<SaleRecord>) -> Self {
        Self {
            source,
            sender,
            next_offset: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    fn source(&self) -> SourceSystem {
        self.source
    }

    async fn publish(&self, event: SaleEvent) -> PipelineResult<()> {
        let event = canonicalize(event, self.source);
        let lineage_id = event
            .lineage_id
            .expect("canonicalize always stamps a lineage id");

        let mut headers = HeaderMap::new();
        lineage::attach(&mut headers, lineage_id, event.source_system, event.timestamp);

        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        let record = SaleRecord::new(self.source, offset, headers, event);
        self.sender
            .send(record)
            .await
            .map_err(|e| PipelineError::TransportError(format!("channel closed: {e}")))?;
        Ok(())
    }
}
