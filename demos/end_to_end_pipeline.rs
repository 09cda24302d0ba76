// Copyright 2025 Cowboy AI, LLC.

//! End-to-end pipeline demo with in-memory transport and stores.
//!
//! Publishes a handful of sales from the three sources, runs both rollup
//! topologies and the lineage recorder, then prints the sink tables.
//!
//! Run with: cargo run --example end_to_end_pipeline

use anyhow::Result;
use chrono::{TimeZone, Utc};
use cim_sales_pipeline::infrastructure::{
    DeadLetterBuffer, InMemoryCheckpointStore, InMemoryLineageStore, InMemoryUpsertSink,
    LineageStore,
};
use cim_sales_pipeline::{
    merge_sources, ChannelEventPublisher, CitySalesAggregate, CitySalesRow, DedupStore,
    EventPublisher, InMemoryStatePersistence, LineageId, LineageRecorder, PipelineMetrics,
    SaleEvent, SaleRecord, SalesmanAggregate, SalesmanStatsRow, SinkRetryPolicy, SourceSystem,
    TopologyWorker, TumblingWindows, WindowedAggregator,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const BASE_MILLIS: i64 = 1_699_999_200_000;

fn sale(
    sale_id: &str,
    city: &str,
    salesman_id: &str,
    product: &str,
    total_amount: f64,
    offset_millis: i64,
) -> SaleEvent {
    SaleEvent {
        sale_id: sale_id.to_string(),
        timestamp: Utc.timestamp_millis_opt(BASE_MILLIS + offset_millis).unwrap(),
        salesman_id: salesman_id.to_string(),
        salesman_name: format!("Salesperson {salesman_id}"),
        customer_id: "CUST-1".to_string(),
        product_id: format!("PRD-{product}"),
        product_name: product.to_string(),
        quantity: 1,
        unit_price: total_amount,
        total_amount,
        city: city.to_string(),
        country: "Portugal".to_string(),
        source_system: SourceSystem::Db,
        ingestion_timestamp: Utc::now(),
        lineage_id: None, // minted at publication
    }
}

async fn publish(source: SourceSystem, events: Vec<SaleEvent>) -> Vec<SaleRecord> {
    let (tx, mut rx) = mpsc::channel(events.len().max(1));
    let publisher = ChannelEventPublisher::new(source, tx);
    for event in events {
        publisher.publish(event).await.expect("channel open");
    }
    drop(publisher);

    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        records.push(record);
    }
    records
}

fn fan_out(
    per_source: &[(SourceSystem, Vec<SaleRecord>)],
) -> impl tokio_stream::Stream<Item = SaleRecord> + Unpin {
    let mut channels = Vec::new();
    for (source, records) in per_source {
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for record in records {
            tx.try_send(record.clone()).expect("capacity reserved");
        }
        channels.push((*source, rx));
    }
    merge_sources(channels)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let metrics = Arc::new(PipelineMetrics::new());

    // The polled remote source returns overlapping pages; the connector
    // dedups by business key before publishing
    let soap_polls = vec![
        vec![sale("S3", "Lisbon", "SEL002", "Widget", 25.0, 3_000)],
        vec![
            sale("S3", "Lisbon", "SEL002", "Widget", 25.0, 3_000),
            sale("S5", "Faro", "SEL002", "Gadget", 15.0, 5_000),
        ],
    ];
    let mut dedup = DedupStore::new(1024);
    let mut soap_events = Vec::new();
    for poll in soap_polls {
        for event in poll {
            if dedup.insert(&event.sale_id) {
                soap_events.push(event);
            } else {
                metrics.record_duplicate_dropped();
            }
        }
    }

    // Simulated connector output: three sources, one busy hour
    let per_source = vec![
        (
            SourceSystem::Db,
            publish(
                SourceSystem::Db,
                vec![
                    sale("S1", "Lisbon", "SEL001", "Widget", 100.0, 1_000),
                    sale("S4", "Porto", "SEL001", "Gadget", 40.0, 4_000),
                ],
            )
            .await,
        ),
        (
            SourceSystem::File,
            publish(
                SourceSystem::File,
                vec![sale("S2", "Lisbon", "SEL001", "Gadget", 50.0, 2_000)],
            )
            .await,
        ),
        (SourceSystem::Soap, publish(SourceSystem::Soap, soap_events).await),
    ];

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let city_sink: InMemoryUpsertSink<CitySalesRow> = InMemoryUpsertSink::new("top_sales_by_city");
    let salesman_sink: InMemoryUpsertSink<SalesmanStatsRow> =
        InMemoryUpsertSink::new("top_salesman_country");
    let lineage_store = InMemoryLineageStore::new();

    let city_worker: TopologyWorker<CitySalesAggregate> = TopologyWorker::new(
        WindowedAggregator::new(TumblingWindows::hourly(), Arc::clone(&metrics)),
        Arc::new(city_sink.clone()),
        Arc::new(InMemoryStatePersistence::new()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(DeadLetterBuffer::new(16)),
        Arc::clone(&metrics),
        SinkRetryPolicy::default(),
        shutdown_rx.clone(),
    );
    let salesman_worker: TopologyWorker<SalesmanAggregate> = TopologyWorker::new(
        WindowedAggregator::new(TumblingWindows::hourly(), Arc::clone(&metrics)),
        Arc::new(salesman_sink.clone()),
        Arc::new(InMemoryStatePersistence::new()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(DeadLetterBuffer::new(16)),
        Arc::clone(&metrics),
        SinkRetryPolicy::default(),
        shutdown_rx.clone(),
    );
    let recorder = LineageRecorder::new(
        Arc::new(lineage_store.clone()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::clone(&metrics),
        shutdown_rx,
    );

    let city_handle = tokio::spawn(city_worker.run(fan_out(&per_source)));
    let salesman_handle = tokio::spawn(salesman_worker.run(fan_out(&per_source)));
    let recorder_handle = tokio::spawn(recorder.run(fan_out(&per_source)));

    city_handle.await??;
    salesman_handle.await??;
    recorder_handle.await??;
    drop(shutdown_tx);

    println!("\n== top_sales_by_city ==");
    for row in city_sink.all().await {
        println!(
            "{:8} [{} .. {}): total={:>7.2} count={} top_product={:?}",
            row.city, row.window_start, row.window_end, row.total_sales, row.transaction_count,
            row.top_product
        );
    }

    println!("\n== top_salesman_country ==");
    for row in salesman_sink.all().await {
        println!(
            "{:8} ({}) [{} .. {}): total={:>7.2} count={} cities={}",
            row.salesman_id,
            row.salesman_name,
            row.window_start,
            row.window_end,
            row.total_sales,
            row.transaction_count,
            row.cities_covered
        );
    }

    println!("\n== data_lineage ==");
    let lineage_ids: Vec<LineageId> = per_source
        .iter()
        .flat_map(|(_, records)| records.iter().filter_map(|r| r.event.lineage_id))
        .collect();
    for lineage_id in lineage_ids {
        if let Some(audit) = lineage_store.get(lineage_id).await? {
            let step = &audit.transformation_steps["ingestion"];
            println!(
                "{} sale={} source={} via {}@{}",
                audit.lineage_id, audit.sale_id, audit.source_system, step.topic, step.offset
            );
        }
    }

    metrics.flush();
    Ok(())
}
