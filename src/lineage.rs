// Copyright 2025 Cowboy AI, LLC.

//! Lineage propagation and audit records
//!
//! Every producing and consuming component uses this module to attach, read
//! and forward correlation metadata on transport headers. A lineage id is
//! minted exactly once, at the earliest point an event exists, and carried
//! unchanged through every hop; the ingestion timestamp is re-stamped at
//! each forwarding point.
//!
//! [`LineageRecord`] is the audit-trail entity. It is the only entity in the
//! pipeline with concurrent-writer semantics, so its transformation-step map
//! merges with a commutative, idempotent operation instead of a plain
//! overwrite.

use crate::errors::{PipelineError, PipelineResult};
use crate::events::SourceSystem;
use async_nats::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Header carrying the lineage id
pub const LINEAGE_ID_HEADER: &str = "lineage-id";
/// Header carrying the originating system
pub const SOURCE_SYSTEM_HEADER: &str = "source-system";
/// Header carrying the source event time (epoch milliseconds)
pub const SOURCE_TIMESTAMP_HEADER: &str = "source-timestamp";
/// Header carrying the ingestion time at the last hop (epoch milliseconds)
pub const INGESTION_TIMESTAMP_HEADER: &str = "ingestion-timestamp";

/// End-to-end correlation identifier, minted once per canonical event
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct LineageId(Uuid);

impl LineageId {
    /// Mint a new unique lineage id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse the header representation
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for LineageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<LineageId> for Uuid {
    fn from(id: LineageId) -> Self {
        id.0
    }
}

/// Mint a new unique lineage id
pub fn generate() -> LineageId {
    LineageId::new()
}

/// Stamp correlation metadata onto transport headers.
///
/// The ingestion timestamp is set to "now" at the attach point; the other
/// three values are carried as given. No I/O, header mutation only.
pub fn attach(
    headers: &mut HeaderMap,
    lineage_id: LineageId,
    source_system: SourceSystem,
    source_timestamp: DateTime<Utc>,
) {
    headers.insert(LINEAGE_ID_HEADER, lineage_id.to_string().as_str());
    headers.insert(SOURCE_SYSTEM_HEADER, source_system.as_str());
    headers.insert(
        SOURCE_TIMESTAMP_HEADER,
        source_timestamp.timestamp_millis().to_string().as_str(),
    );
    headers.insert(
        INGESTION_TIMESTAMP_HEADER,
        Utc::now().timestamp_millis().to_string().as_str(),
    );
}

/// Read a header value; absent headers yield `None`, never an error
pub fn read<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).map(|value| value.as_str())
}

/// Copy lineage id, source system and source timestamp unchanged from
/// `source` to `target`, re-stamping the ingestion timestamp to "now" at
/// the forwarding point.
pub fn forward(source: &HeaderMap, target: &mut HeaderMap) {
    for name in [
        LINEAGE_ID_HEADER,
        SOURCE_SYSTEM_HEADER,
        SOURCE_TIMESTAMP_HEADER,
    ] {
        if let Some(value) = read(source, name) {
            target.insert(name, value);
        }
    }
    target.insert(
        INGESTION_TIMESTAMP_HEADER,
        Utc::now().timestamp_millis().to_string().as_str(),
    );
}

/// Correlation metadata resolved from transport headers.
///
/// Every field is optional: consumers decide how to handle partially
/// propagated metadata (the lineage recorder falls back to the event body).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedLineage {
    /// Lineage id, if propagated
    pub lineage_id: Option<LineageId>,
    /// Originating system, if propagated
    pub source_system: Option<SourceSystem>,
    /// Source event time, if propagated
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Ingestion time at the last hop, if propagated
    pub ingestion_timestamp: Option<DateTime<Utc>>,
}

impl ResolvedLineage {
    /// Resolve all four correlation headers at once
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            lineage_id: read(headers, LINEAGE_ID_HEADER).and_then(LineageId::parse),
            source_system: read(headers, SOURCE_SYSTEM_HEADER).and_then(SourceSystem::parse),
            source_timestamp: read(headers, SOURCE_TIMESTAMP_HEADER).and_then(parse_millis),
            ingestion_timestamp: read(headers, INGESTION_TIMESTAMP_HEADER).and_then(parse_millis),
        }
    }
}

fn parse_millis(s: &str) -> Option<DateTime<Utc>> {
    s.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// One observation of an event at a processing stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransformationStep {
    /// Processing stage that observed the event
    pub stage: String,
    /// Topic/subject the event was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: u64,
    /// When the observation was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Audit record for one lineage id
///
/// The identity fields (`sale_id`, `source_system`, `source_timestamp`,
/// `ingestion_timestamp`) are set once when the record is first written and
/// never change; only the transformation-step map grows afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineageRecord {
    /// The lineage id this record describes
    pub lineage_id: LineageId,
    /// Business key of the underlying sale
    pub sale_id: String,
    /// Originating system
    pub source_system: SourceSystem,
    /// Source event time
    pub source_timestamp: DateTime<Utc>,
    /// When the event was first normalized
    pub ingestion_timestamp: DateTime<Utc>,
    /// Observations keyed by stage name; merge-only
    pub transformation_steps: IndexMap<String, TransformationStep>,
}

impl LineageRecord {
    /// Create a record with a single observation
    pub fn new(
        lineage_id: LineageId,
        sale_id: impl Into<String>,
        source_system: SourceSystem,
        source_timestamp: DateTime<Utc>,
        ingestion_timestamp: DateTime<Utc>,
        step: TransformationStep,
    ) -> Self {
        let mut transformation_steps = IndexMap::new();
        transformation_steps.insert(step.stage.clone(), step);
        Self {
            lineage_id,
            sale_id: sale_id.into(),
            source_system,
            source_timestamp,
            ingestion_timestamp,
            transformation_steps,
        }
    }

    /// Merge another record for the same lineage id into this one.
    ///
    /// Identity fields keep their first-written values. Steps are merged per
    /// stage; when two writers observed the same stage, the entry with the
    /// greater offset wins, which makes the merge commutative, idempotent
    /// and associative regardless of writer interleaving.
    pub fn merge(&mut self, other: &LineageRecord) -> PipelineResult<()> {
        if self.lineage_id != other.lineage_id {
            return Err(PipelineError::LineageStoreError(format!(
                "cannot merge lineage {} into {}",
                other.lineage_id, self.lineage_id
            )));
        }
        for (stage, step) in &other.transformation_steps {
            match self.transformation_steps.get(stage) {
                Some(existing) if existing.offset >= step.offset => {}
                _ => {
                    self.transformation_steps.insert(stage.clone(), step.clone());
                }
            }
        }
        Ok(())
    }
}
