// Copyright 2025 Cowboy AI, LLC.

//! Walkthrough of lineage propagation across hops and stages.
//!
//! Run with: cargo run --example lineage_walkthrough

use anyhow::Result;
use async_nats::HeaderMap;
use chrono::{TimeZone, Utc};
use cim_sales_pipeline::infrastructure::{InMemoryLineageStore, LineageStore};
use cim_sales_pipeline::lineage::{self, LineageRecord, ResolvedLineage, TransformationStep};
use cim_sales_pipeline::SourceSystem;

#[tokio::main]
async fn main() -> Result<()> {
    let source_timestamp = Utc.timestamp_millis_opt(1_699_999_200_000).unwrap();

    // Hop 1: the connector mints the id and stamps the headers
    let lineage_id = lineage::generate();
    let mut connector_headers = HeaderMap::new();
    lineage::attach(
        &mut connector_headers,
        lineage_id,
        SourceSystem::File,
        source_timestamp,
    );
    println!("connector stamped lineage {lineage_id}");

    // Hop 2: a downstream stage forwards the metadata, re-stamping only the
    // ingestion timestamp
    let mut processor_headers = HeaderMap::new();
    lineage::forward(&connector_headers, &mut processor_headers);
    let resolved = ResolvedLineage::from_headers(&processor_headers);
    println!(
        "processor sees lineage={:?} source={:?} source_ts={:?}",
        resolved.lineage_id, resolved.source_system, resolved.source_timestamp
    );
    assert_eq!(resolved.lineage_id, Some(lineage_id));

    // Two stages race to record the same lineage id; the merge keeps both
    // steps distinguishable by stage
    let store = InMemoryLineageStore::new();
    for (stage, topic, offset) in [
        ("ingestion", "sales.raw.file", 12),
        ("aggregation", "sales.agg.city", 3),
    ] {
        store
            .record(LineageRecord::new(
                lineage_id,
                "SALE-0001",
                SourceSystem::File,
                source_timestamp,
                Utc::now(),
                TransformationStep {
                    stage: stage.to_string(),
                    topic: topic.to_string(),
                    partition: 0,
                    offset,
                    recorded_at: Utc::now(),
                },
            ))
            .await?;
    }

    let audit = store.get(lineage_id).await?.expect("record exists");
    println!("\naudit record for {lineage_id}:");
    println!("  sale_id:   {}", audit.sale_id);
    println!("  source:    {}", audit.source_system);
    for (stage, step) in &audit.transformation_steps {
        println!("  step[{stage}]: {}@{}", step.topic, step.offset);
    }

    Ok(())
}
