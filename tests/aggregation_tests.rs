//! Aggregation engine scenarios over the public API

mod support;

use cim_sales_pipeline::{
    CitySalesAggregate, CitySalesRow, PipelineMetrics, SalesmanAggregate, TumblingWindows,
    WindowAggregate, WindowedAggregator,
};
use cim_sales_pipeline::infrastructure::{InMemoryUpsertSink, UpsertSink};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::{sale_event, BASE_MILLIS};

const HOUR: i64 = 3_600_000;

fn city_engine() -> (WindowedAggregator<CitySalesAggregate>, Arc<PipelineMetrics>) {
    let metrics = Arc::new(PipelineMetrics::new());
    (
        WindowedAggregator::new(TumblingWindows::hourly(), Arc::clone(&metrics)),
        metrics,
    )
}

#[test]
fn lisbon_window_accumulates_to_final_snapshot() {
    let (mut engine, _) = city_engine();

    engine.process(&sale_event("S1", "Lisbon", "SEL001", 100.0, BASE_MILLIS + 1_000));
    engine.process(&sale_event("S2", "Lisbon", "SEL001", 50.0, BASE_MILLIS + 2_000));
    let outcome = engine.process(&sale_event("S3", "Lisbon", "SEL001", 25.0, BASE_MILLIS + 3_000));

    let snapshot = outcome.emission.expect("third event emits");
    assert_eq!(snapshot.city, "Lisbon");
    assert_eq!(snapshot.total_sales, 175.0);
    assert_eq!(snapshot.transaction_count, 3);
    assert_eq!(snapshot.window_start, BASE_MILLIS);
    assert_eq!(snapshot.window_end, BASE_MILLIS + HOUR);
}

#[test]
fn salesman_covers_two_cities() {
    let metrics = Arc::new(PipelineMetrics::new());
    let mut engine: WindowedAggregator<SalesmanAggregate> =
        WindowedAggregator::new(TumblingWindows::hourly(), metrics);

    engine.process(&sale_event("S1", "Lisbon", "SEL001", 10.0, BASE_MILLIS + 1_000));
    let outcome = engine.process(&sale_event("S2", "Porto", "SEL001", 20.0, BASE_MILLIS + 2_000));

    let snapshot = outcome.emission.expect("second event emits");
    assert_eq!(snapshot.salesman_id, "SEL001");
    assert_eq!(snapshot.cities_count(), 2);
    assert!(snapshot.cities_covered.contains("Lisbon"));
    assert!(snapshot.cities_covered.contains("Porto"));
}

#[test]
fn transaction_count_is_monotonic_within_a_window() {
    let (mut engine, _) = city_engine();

    let mut last = 0;
    for i in 0..20 {
        let outcome = engine.process(&sale_event(
            &format!("S{i}"),
            "Lisbon",
            "SEL001",
            1.0,
            BASE_MILLIS + i * 1_000,
        ));
        let count = outcome.emission.unwrap().transaction_count;
        assert!(count >= last, "count regressed: {count} < {last}");
        last = count;
    }
    assert_eq!(last, 20);
}

#[test]
fn totals_are_order_independent_within_a_window() {
    use rand::seq::SliceRandom;

    let amounts: Vec<f64> = (1..=10).map(|i| i as f64 * 3.5).collect();
    let expected: f64 = amounts.iter().sum();

    let mut shuffled: Vec<(usize, f64)> = amounts.into_iter().enumerate().collect();
    shuffled.shuffle(&mut rand::thread_rng());

    let (mut engine, _) = city_engine();
    let mut last_snapshot = None;
    for (i, amount) in shuffled {
        let outcome = engine.process(&sale_event(
            &format!("S{i}"),
            "Lisbon",
            "SEL001",
            amount,
            BASE_MILLIS + i as i64 * 1_000,
        ));
        last_snapshot = outcome.emission;
    }

    let snapshot = last_snapshot.unwrap();
    assert!((snapshot.total_sales - expected).abs() < 1e-9);
    assert_eq!(snapshot.transaction_count, 10);
}

#[test]
fn event_at_window_close_boundary_belongs_to_next_window() {
    let (mut engine, _) = city_engine();

    engine.process(&sale_event("S1", "Lisbon", "SEL001", 10.0, BASE_MILLIS + HOUR - 1));
    let outcome = engine.process(&sale_event("S2", "Lisbon", "SEL001", 20.0, BASE_MILLIS + HOUR));

    let snapshot = outcome.emission.unwrap();
    assert_eq!(snapshot.window_start, BASE_MILLIS + HOUR);
    assert_eq!(snapshot.transaction_count, 1);

    // Crossing the boundary closed the first window
    assert_eq!(outcome.closed.len(), 1);
    assert_eq!(outcome.closed[0].aggregate.window_start, BASE_MILLIS);
}

#[test]
fn late_event_never_folds_into_closed_window() {
    let (mut engine, metrics) = city_engine();

    engine.process(&sale_event("S1", "Lisbon", "SEL001", 10.0, BASE_MILLIS + 1_000));
    // Watermark moves past the first window
    engine.process(&sale_event("S2", "Lisbon", "SEL001", 10.0, BASE_MILLIS + HOUR + 1_000));

    let outcome = engine.process(&sale_event("S3", "Lisbon", "SEL001", 99.0, BASE_MILLIS + 2_000));
    assert!(outcome.emission.is_none());
    assert_eq!(metrics.snapshot().events_late, 1);

    // State of the closed window is unchanged
    let state = engine.arena().get("Lisbon", BASE_MILLIS).unwrap();
    assert_eq!(state.aggregate.total_sales, 10.0);
}

#[test]
fn malformed_event_increments_counter_and_spares_other_keys() {
    let (mut engine, metrics) = city_engine();

    engine.process(&sale_event("S1", "Porto", "SEL002", 30.0, BASE_MILLIS + 1_000));

    let mut bad = sale_event("S2", "Lisbon", "SEL001", 10.0, BASE_MILLIS + 2_000);
    bad.quantity = 0;
    let outcome = engine.process(&bad);

    assert!(outcome.emission.is_none());
    assert_eq!(metrics.snapshot().events_malformed, 1);

    let porto = engine.arena().get("Porto", BASE_MILLIS).unwrap();
    assert_eq!(porto.aggregate.transaction_count, 1);
}

#[tokio::test]
async fn upsert_applied_twice_yields_identical_state() {
    let sink: InMemoryUpsertSink<CitySalesRow> = InMemoryUpsertSink::new("top_sales_by_city");
    let (mut engine, _) = city_engine();

    let snapshot = engine
        .process(&sale_event("S1", "Lisbon", "SEL001", 75.0, BASE_MILLIS + 1_000))
        .emission
        .unwrap();
    let row = snapshot.to_row();
    let bounds = snapshot.bounds();

    sink.upsert("Lisbon", bounds, &row).await.unwrap();
    let first = sink.get("Lisbon", bounds.start).await.unwrap();
    sink.upsert("Lisbon", bounds, &row).await.unwrap();
    let second = sink.get("Lisbon", bounds.start).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(sink.len().await, 1);
}

#[tokio::test]
async fn later_emission_dominates_earlier_upsert() {
    let sink: InMemoryUpsertSink<CitySalesRow> = InMemoryUpsertSink::new("top_sales_by_city");
    let (mut engine, _) = city_engine();

    let first = engine
        .process(&sale_event("S1", "Lisbon", "SEL001", 100.0, BASE_MILLIS + 1_000))
        .emission
        .unwrap();
    sink.upsert("Lisbon", first.bounds(), &first.to_row()).await.unwrap();

    let second = engine
        .process(&sale_event("S2", "Lisbon", "SEL001", 50.0, BASE_MILLIS + 2_000))
        .emission
        .unwrap();
    sink.upsert("Lisbon", second.bounds(), &second.to_row()).await.unwrap();

    let stored = sink.get("Lisbon", BASE_MILLIS).await.unwrap();
    assert_eq!(stored.total_sales, 150.0);
    assert_eq!(stored.transaction_count, 2);
}
