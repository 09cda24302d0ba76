// Copyright 2025 Cowboy AI, LLC.

//! Canonical sale events
//!
//! Every source connector normalizes its payloads into [`SaleEvent`], the
//! single source-agnostic representation of one business transaction. The
//! wire shape is JSON with snake_case field names and epoch-millisecond
//! timestamps; once produced, an event is immutable.

use crate::errors::{PipelineError, PipelineResult};
use crate::lineage::LineageId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The system a sale event originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum SourceSystem {
    /// Database change-capture stream
    #[serde(rename = "DB")]
    Db,
    /// File-drop watcher
    #[serde(rename = "FILE")]
    File,
    /// Polled remote SOAP service
    #[serde(rename = "SOAP")]
    Soap,
}

impl SourceSystem {
    /// Header/wire representation of this source
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Db => "DB",
            SourceSystem::File => "FILE",
            SourceSystem::Soap => "SOAP",
        }
    }

    /// Parse the header/wire representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DB" => Some(SourceSystem::Db),
            "FILE" => Some(SourceSystem::File),
            "SOAP" => Some(SourceSystem::Soap),
            _ => None,
        }
    }

    /// Raw subject this source publishes canonical events to
    pub fn subject(&self) -> &'static str {
        match self {
            SourceSystem::Db => "sales.raw.db",
            SourceSystem::File => "sales.raw.file",
            SourceSystem::Soap => "sales.raw.soap",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical sale event, immutable once produced
///
/// `lineage_id` and `ingestion_timestamp` are stamped exactly once at first
/// normalization (see [`crate::producer::canonicalize`]) and carried
/// unchanged through every downstream stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SaleEvent {
    /// Globally unique business key
    pub sale_id: String,

    /// Event time (epoch milliseconds on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schemars(with = "i64")]
    pub timestamp: DateTime<Utc>,

    /// Salesperson identifier
    pub salesman_id: String,

    /// Salesperson display name
    pub salesman_name: String,

    /// Counterparty identifier
    pub customer_id: String,

    /// Product identifier
    pub product_id: String,

    /// Product display name
    pub product_name: String,

    /// Units sold; always positive
    pub quantity: u32,

    /// Price per unit, non-negative
    pub unit_price: f64,

    /// Total transaction amount, non-negative
    pub total_amount: f64,

    /// City the sale happened in
    pub city: String,

    /// Country the sale happened in
    pub country: String,

    /// Originating system
    pub source_system: SourceSystem,

    /// When the event was first normalized (epoch milliseconds on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schemars(with = "i64")]
    pub ingestion_timestamp: DateTime<Utc>,

    /// End-to-end correlation id, minted once at the earliest point the
    /// event exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage_id: Option<LineageId>,
}

impl SaleEvent {
    /// Validate the invariants a canonical event must satisfy.
    ///
    /// Failures are per-event; callers drop the event and increment the
    /// malformed counter rather than aborting the stream.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.sale_id.trim().is_empty() {
            return Err(PipelineError::malformed("sale_id is blank"));
        }
        if self.city.trim().is_empty() {
            return Err(PipelineError::malformed("city is blank"));
        }
        if self.salesman_id.trim().is_empty() {
            return Err(PipelineError::malformed("salesman_id is blank"));
        }
        if self.quantity == 0 {
            return Err(PipelineError::malformed("quantity must be positive"));
        }
        if !self.unit_price.is_finite() || self.unit_price < 0.0 {
            return Err(PipelineError::malformed(format!(
                "unit_price is not a non-negative number: {}",
                self.unit_price
            )));
        }
        if !self.total_amount.is_finite() || self.total_amount < 0.0 {
            return Err(PipelineError::malformed(format!(
                "total_amount is not a non-negative number: {}",
                self.total_amount
            )));
        }
        Ok(())
    }

    /// Decode and validate a canonical event from its JSON wire form
    pub fn from_json(bytes: &[u8]) -> PipelineResult<Self> {
        let event: SaleEvent = serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::malformed(format!("invalid JSON payload: {e}")))?;
        event.validate()?;
        Ok(event)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Event builders shared by unit tests across the crate

    use super::*;
    use chrono::TimeZone;

    /// A fully populated canonical event at the given city/amount/time
    pub(crate) fn sale(city: &str, total_amount: f64, ts_millis: i64) -> SaleEvent {
        SaleEvent {
            sale_id: format!("SALE-{city}-{ts_millis}"),
            timestamp: Utc.timestamp_millis_opt(ts_millis).unwrap(),
            salesman_id: "SEL001".to_string(),
            salesman_name: "Ana Costa".to_string(),
            customer_id: "CUST-42".to_string(),
            product_id: "PRD-7".to_string(),
            product_name: "Widget".to_string(),
            quantity: 3,
            unit_price: total_amount / 3.0,
            total_amount,
            city: city.to_string(),
            country: "Portugal".to_string(),
            source_system: SourceSystem::Db,
            ingestion_timestamp: Utc.timestamp_millis_opt(ts_millis + 500).unwrap(),
            lineage_id: Some(LineageId::new()),
        }
    }

    /// The fixture most tests start from
    pub(crate) fn sample_event() -> SaleEvent {
        sale("Lisbon", 59.97, 1_700_000_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sample_event;
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let event = sample_event();
        let json = serde_json::to_value(&event).unwrap();

        for field in [
            "sale_id",
            "timestamp",
            "salesman_id",
            "salesman_name",
            "customer_id",
            "product_id",
            "product_name",
            "quantity",
            "unit_price",
            "total_amount",
            "city",
            "country",
            "source_system",
            "ingestion_timestamp",
            "lineage_id",
        ] {
            assert!(json.get(field).is_some(), "missing wire field {field}");
        }
        assert_eq!(json["source_system"], "DB");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_serde_roundtrip() {
        let event = sample_event();
        let json = serde_json::to_vec(&event).unwrap();
        let back = SaleEvent::from_json(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_missing_lineage_id_tolerated() {
        let mut event = sample_event();
        event.lineage_id = None;
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("lineage_id"));
        let back = SaleEvent::from_json(json.as_bytes()).unwrap();
        assert!(back.lineage_id.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_quantity() {
        let mut event = sample_event();
        event.quantity = 0;
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_amount() {
        let mut event = sample_event();
        event.total_amount = f64::NAN;
        assert!(event.validate().is_err());

        event.total_amount = -1.0;
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_keys() {
        let mut event = sample_event();
        event.city = "  ".to_string();
        assert!(event.validate().is_err());

        let mut event = sample_event();
        event.sale_id = String::new();
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_from_json_rejects_non_numeric_quantity() {
        let mut json = serde_json::to_value(sample_event()).unwrap();
        json["quantity"] = serde_json::Value::String("three".to_string());
        let bytes = serde_json::to_vec(&json).unwrap();

        let err = SaleEvent::from_json(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedEvent { .. }));
    }

    #[test]
    fn test_source_system_parse() {
        assert_eq!(SourceSystem::parse("DB"), Some(SourceSystem::Db));
        assert_eq!(SourceSystem::parse("FILE"), Some(SourceSystem::File));
        assert_eq!(SourceSystem::parse("SOAP"), Some(SourceSystem::Soap));
        assert_eq!(SourceSystem::parse("FTP"), None);
        assert_eq!(SourceSystem::Soap.subject(), "sales.raw.soap");
    }
}
