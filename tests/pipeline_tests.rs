//! End-to-end pipeline: publish → merge → both topologies → sinks, with the
//! lineage recorder tapping the same raw streams

mod support;

use cim_sales_pipeline::infrastructure::{
    DeadLetterBuffer, InMemoryCheckpointStore, InMemoryLineageStore, InMemoryUpsertSink,
    LineageStore,
};
use cim_sales_pipeline::{
    merge_sources, ChannelEventPublisher, CitySalesAggregate, CitySalesRow, EventPublisher,
    InMemoryStatePersistence, LineageRecorder, PipelineMetrics, SaleRecord, SalesmanAggregate,
    SalesmanStatsRow, SinkRetryPolicy, SourceSystem, TopologyWorker, TumblingWindows,
    WindowedAggregator,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::{sale_event, BASE_MILLIS};
use tokio::sync::{mpsc, watch};

/// Publish each source's events through a real publisher (stamping lineage
/// and offsets), then collect the records for fan-out to the consumers.
async fn published_records(
    source: SourceSystem,
    events: Vec<cim_sales_pipeline::SaleEvent>,
) -> Vec<SaleRecord> {
    let (tx, mut rx) = mpsc::channel(events.len().max(1));
    let publisher = ChannelEventPublisher::new(source, tx);
    for event in events {
        publisher.publish(event).await.unwrap();
    }
    drop(publisher);

    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        records.push(record);
    }
    records
}

/// Feed a copy of every source's records into a fresh channel set, merged —
/// one independent consumer of the raw streams.
fn consumer_input(
    per_source: &[(SourceSystem, Vec<SaleRecord>)],
) -> impl tokio_stream::Stream<Item = SaleRecord> + Unpin {
    let mut channels = Vec::new();
    for (source, records) in per_source {
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for record in records {
            tx.try_send(record.clone()).unwrap();
        }
        channels.push((*source, rx));
    }
    merge_sources(channels)
}

fn city_worker(
    sink: &InMemoryUpsertSink<CitySalesRow>,
    metrics: &Arc<PipelineMetrics>,
    shutdown: watch::Receiver<bool>,
) -> TopologyWorker<CitySalesAggregate> {
    TopologyWorker::new(
        WindowedAggregator::new(TumblingWindows::hourly(), Arc::clone(metrics)),
        Arc::new(sink.clone()),
        Arc::new(InMemoryStatePersistence::new()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(DeadLetterBuffer::new(16)),
        Arc::clone(metrics),
        SinkRetryPolicy::default(),
        shutdown,
    )
}

fn salesman_worker(
    sink: &InMemoryUpsertSink<SalesmanStatsRow>,
    metrics: &Arc<PipelineMetrics>,
    shutdown: watch::Receiver<bool>,
) -> TopologyWorker<SalesmanAggregate> {
    TopologyWorker::new(
        WindowedAggregator::new(TumblingWindows::hourly(), Arc::clone(metrics)),
        Arc::new(sink.clone()),
        Arc::new(InMemoryStatePersistence::new()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(DeadLetterBuffer::new(16)),
        Arc::clone(metrics),
        SinkRetryPolicy::default(),
        shutdown,
    )
}

#[tokio::test]
async fn full_pipeline_produces_both_rollups_and_lineage() {
    // Events from three sources, all inside one window; the file and soap
    // events arrive without lineage ids and get them minted at publication
    let mut file_event = sale_event("S2", "Lisbon", "SEL001", 50.0, BASE_MILLIS + 2_000);
    file_event.lineage_id = None;
    let mut soap_event = sale_event("S3", "Lisbon", "SEL002", 25.0, BASE_MILLIS + 3_000);
    soap_event.lineage_id = None;

    let per_source = vec![
        (
            SourceSystem::Db,
            published_records(
                SourceSystem::Db,
                vec![
                    sale_event("S1", "Lisbon", "SEL001", 100.0, BASE_MILLIS + 1_000),
                    sale_event("S4", "Porto", "SEL001", 40.0, BASE_MILLIS + 4_000),
                ],
            )
            .await,
        ),
        (
            SourceSystem::File,
            published_records(SourceSystem::File, vec![file_event]).await,
        ),
        (
            SourceSystem::Soap,
            published_records(SourceSystem::Soap, vec![soap_event]).await,
        ),
    ];

    let metrics = Arc::new(PipelineMetrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let city_sink: InMemoryUpsertSink<CitySalesRow> = InMemoryUpsertSink::new("top_sales_by_city");
    let salesman_sink: InMemoryUpsertSink<SalesmanStatsRow> =
        InMemoryUpsertSink::new("top_salesman_country");
    let lineage_store = InMemoryLineageStore::new();

    // Each consumer taps its own copy of the raw streams, like independent
    // consumer groups
    let city_handle = tokio::spawn(
        city_worker(&city_sink, &metrics, shutdown_rx.clone()).run(consumer_input(&per_source)),
    );
    let salesman_handle = tokio::spawn(
        salesman_worker(&salesman_sink, &metrics, shutdown_rx.clone())
            .run(consumer_input(&per_source)),
    );
    let recorder = LineageRecorder::new(
        Arc::new(lineage_store.clone()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::clone(&metrics),
        shutdown_rx,
    );
    let recorder_handle = tokio::spawn(recorder.run(consumer_input(&per_source)));

    let city_stats = city_handle.await.unwrap().unwrap();
    let salesman_stats = salesman_handle.await.unwrap().unwrap();
    let recorder_stats = recorder_handle.await.unwrap().unwrap();
    drop(shutdown_tx);

    assert_eq!(city_stats.records_seen, 4);
    assert_eq!(salesman_stats.records_seen, 4);
    assert_eq!(recorder_stats.records_written, 4);

    // City rollup: Lisbon saw 100 + 50 + 25 across the three sources
    let lisbon = city_sink.get("Lisbon", BASE_MILLIS).await.unwrap();
    assert_eq!(lisbon.total_sales, 175.0);
    assert_eq!(lisbon.transaction_count, 3);
    let porto = city_sink.get("Porto", BASE_MILLIS).await.unwrap();
    assert_eq!(porto.total_sales, 40.0);

    // Salesperson rollup: SEL001 sold in Lisbon and Porto
    let sel001 = salesman_sink.get("SEL001", BASE_MILLIS).await.unwrap();
    assert_eq!(sel001.total_sales, 190.0);
    assert_eq!(sel001.transaction_count, 3);
    assert_eq!(sel001.cities_covered, 2);
    let sel002 = salesman_sink.get("SEL002", BASE_MILLIS).await.unwrap();
    assert_eq!(sel002.transaction_count, 1);
    assert_eq!(sel002.cities_covered, 1);

    // One audit record per event, each with its ingestion step
    assert_eq!(lineage_store.len().await, 4);
    for (_, records) in &per_source {
        for record in records {
            let lineage_id = record.event.lineage_id.unwrap();
            let audit = lineage_store.get(lineage_id).await.unwrap().unwrap();
            assert_eq!(audit.sale_id, record.event.sale_id);
            let step = &audit.transformation_steps["ingestion"];
            assert_eq!(step.topic, record.position.topic);
            assert_eq!(step.offset, record.position.offset);
        }
    }
}

#[tokio::test]
async fn malformed_event_is_contained_end_to_end() {
    let mut bad = sale_event("S-BAD", "Lisbon", "SEL001", 10.0, BASE_MILLIS + 1_000);
    bad.quantity = 0;

    let per_source = vec![(
        SourceSystem::Db,
        published_records(
            SourceSystem::Db,
            vec![
                bad,
                sale_event("S-OK", "Porto", "SEL002", 30.0, BASE_MILLIS + 2_000),
            ],
        )
        .await,
    )];

    let metrics = Arc::new(PipelineMetrics::new());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let city_sink: InMemoryUpsertSink<CitySalesRow> = InMemoryUpsertSink::new("top_sales_by_city");

    let stats = city_worker(&city_sink, &metrics, shutdown_rx)
        .run(consumer_input(&per_source))
        .await
        .unwrap();

    assert_eq!(stats.records_seen, 2);
    assert_eq!(stats.snapshots_upserted, 1);
    assert_eq!(metrics.snapshot().events_malformed, 1);

    assert!(city_sink.get("Lisbon", BASE_MILLIS).await.is_none());
    let porto = city_sink.get("Porto", BASE_MILLIS).await.unwrap();
    assert_eq!(porto.total_sales, 30.0);
}

#[tokio::test]
async fn duplicate_business_key_across_sources_counts_twice() {
    // Intentional: the merge stage does not deduplicate across sources
    let per_source = vec![
        (
            SourceSystem::Db,
            published_records(
                SourceSystem::Db,
                vec![sale_event("S-DUP", "Lisbon", "SEL001", 10.0, BASE_MILLIS + 1_000)],
            )
            .await,
        ),
        (
            SourceSystem::File,
            published_records(
                SourceSystem::File,
                vec![sale_event("S-DUP", "Lisbon", "SEL001", 10.0, BASE_MILLIS + 2_000)],
            )
            .await,
        ),
    ];

    let metrics = Arc::new(PipelineMetrics::new());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let city_sink: InMemoryUpsertSink<CitySalesRow> = InMemoryUpsertSink::new("top_sales_by_city");

    city_worker(&city_sink, &metrics, shutdown_rx)
        .run(consumer_input(&per_source))
        .await
        .unwrap();

    let lisbon = city_sink.get("Lisbon", BASE_MILLIS).await.unwrap();
    assert_eq!(lisbon.transaction_count, 2);
    assert_eq!(lisbon.total_sales, 20.0);
}
