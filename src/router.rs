// Copyright 2025 Cowboy AI, LLC.

//! Stream merge and key routing
//!
//! Unions the three per-source canonical streams into one logical stream.
//! Ordering is preserved within each source channel (and therefore per key,
//! since a key lives on one source partition at a time) but not across
//! sources. Duplicate business keys across sources are NOT deduplicated
//! here: each source is treated as an independent aggregation contribution,
//! matching the upstream topologies.
//!
//! Re-keying by aggregation dimension is
//! [`WindowAggregate::dimension_key`](crate::aggregates::WindowAggregate::dimension_key);
//! the merged stream itself stays keyed by provenance.

use crate::events::{SaleEvent, SourceSystem};
use async_nats::HeaderMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt, StreamMap};

/// Where a record was read from.
///
/// With the JetStream transport, `topic` is the subject, `partition` is
/// always 0 and `offset` is the stream sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamPosition {
    /// Topic/subject the record was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: u64,
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// One canonical event plus its transport metadata, as read off a source
/// channel
#[derive(Debug, Clone)]
pub struct SaleRecord {
    /// Provenance of the record
    pub position: StreamPosition,
    /// Transport headers, carrying the correlation metadata
    pub headers: HeaderMap,
    /// The canonical event itself
    pub event: SaleEvent,
}

impl SaleRecord {
    /// Build a record at the given source and offset
    pub fn new(source: SourceSystem, offset: u64, headers: HeaderMap, event: SaleEvent) -> Self {
        Self {
            position: StreamPosition {
                topic: source.subject().to_string(),
                partition: 0,
                offset,
            },
            headers,
            event,
        }
    }
}

/// Union the per-source channels into one unordered-across-sources stream.
///
/// Each receiver's own ordering survives the merge; fairness across sources
/// comes from [`StreamMap`]'s round-robin polling.
pub fn merge_sources(
    sources: Vec<(SourceSystem, mpsc::Receiver<SaleRecord>)>,
) -> impl Stream<Item = SaleRecord> + Unpin {
    let mut map = StreamMap::new();
    for (source, receiver) in sources {
        map.insert(source.as_str(), ReceiverStream::new(receiver));
    }
    map.map(|(_, record)| record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::fixtures::sale;

    fn record(source: SourceSystem, offset: u64, city: &str) -> SaleRecord {
        SaleRecord::new(
            source,
            offset,
            HeaderMap::new(),
            sale(city, 10.0, 1_700_000_000_000),
        )
    }

    #[tokio::test]
    async fn test_merge_carries_all_sources() {
        let (db_tx, db_rx) = mpsc::channel(8);
        let (file_tx, file_rx) = mpsc::channel(8);
        let (soap_tx, soap_rx) = mpsc::channel(8);

        db_tx.send(record(SourceSystem::Db, 1, "Lisbon")).await.unwrap();
        file_tx.send(record(SourceSystem::File, 1, "Porto")).await.unwrap();
        soap_tx.send(record(SourceSystem::Soap, 1, "Faro")).await.unwrap();
        drop(db_tx);
        drop(file_tx);
        drop(soap_tx);

        let mut merged = merge_sources(vec![
            (SourceSystem::Db, db_rx),
            (SourceSystem::File, file_rx),
            (SourceSystem::Soap, soap_rx),
        ]);

        let mut topics = Vec::new();
        while let Some(record) = merged.next().await {
            topics.push(record.position.topic);
        }
        topics.sort();
        assert_eq!(
            topics,
            vec!["sales.raw.db", "sales.raw.file", "sales.raw.soap"]
        );
    }

    #[tokio::test]
    async fn test_merge_preserves_per_source_order() {
        let (db_tx, db_rx) = mpsc::channel(8);
        let (file_tx, file_rx) = mpsc::channel(8);

        for offset in 1..=3 {
            db_tx.send(record(SourceSystem::Db, offset, "Lisbon")).await.unwrap();
        }
        drop(db_tx);
        drop(file_tx);

        let mut merged = merge_sources(vec![
            (SourceSystem::Db, db_rx),
            (SourceSystem::File, file_rx),
        ]);

        let mut db_offsets = Vec::new();
        while let Some(record) = merged.next().await {
            if record.position.topic == "sales.raw.db" {
                db_offsets.push(record.position.offset);
            }
        }
        assert_eq!(db_offsets, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_merge_does_not_dedup_business_keys() {
        // The same sale id arriving from two sources contributes twice
        let (db_tx, db_rx) = mpsc::channel(8);
        let (file_tx, file_rx) = mpsc::channel(8);

        let mut from_db = record(SourceSystem::Db, 1, "Lisbon");
        from_db.event.sale_id = "SALE-DUP".to_string();
        let mut from_file = record(SourceSystem::File, 1, "Lisbon");
        from_file.event.sale_id = "SALE-DUP".to_string();

        db_tx.send(from_db).await.unwrap();
        file_tx.send(from_file).await.unwrap();
        drop(db_tx);
        drop(file_tx);

        let merged = merge_sources(vec![
            (SourceSystem::Db, db_rx),
            (SourceSystem::File, file_rx),
        ]);
        let records: Vec<_> = merged.collect().await;
        assert_eq!(records.len(), 2);
    }
}
