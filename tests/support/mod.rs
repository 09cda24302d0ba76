//! Shared builders for integration tests

use chrono::{TimeZone, Utc};
use cim_sales_pipeline::{LineageId, SaleEvent, SourceSystem};

/// A fully populated canonical event
pub fn sale_event(
    sale_id: &str,
    city: &str,
    salesman_id: &str,
    total_amount: f64,
    ts_millis: i64,
) -> SaleEvent {
    SaleEvent {
        sale_id: sale_id.to_string(),
        timestamp: Utc.timestamp_millis_opt(ts_millis).unwrap(),
        salesman_id: salesman_id.to_string(),
        salesman_name: format!("Salesperson {salesman_id}"),
        customer_id: "CUST-1".to_string(),
        product_id: "PRD-1".to_string(),
        product_name: "Widget".to_string(),
        quantity: 1,
        unit_price: total_amount,
        total_amount,
        city: city.to_string(),
        country: "Portugal".to_string(),
        source_system: SourceSystem::Db,
        ingestion_timestamp: Utc.timestamp_millis_opt(ts_millis + 250).unwrap(),
        lineage_id: Some(LineageId::new()),
    }
}

/// Base event time used across scenarios; all offsets below one hour stay
/// in the same tumbling window
pub const BASE_MILLIS: i64 = 1_699_999_200_000;
