// Copyright 2025 Cowboy AI, LLC.

//! NATS client for the pipeline transport
//!
//! Wraps connection handling, stream provisioning and KV bucket access.
//! The `SALES_RAW` JetStream stream covers the three per-source subjects
//! (`sales.raw.db`, `sales.raw.file`, `sales.raw.soap`); consumers read it
//! through durable pull consumers filtered per subject.

use crate::events::SaleEvent;
use crate::metrics::PipelineMetrics;
use crate::router::{SaleRecord, StreamPosition};
use async_nats::jetstream::consumer::{pull, Consumer, DeliverPolicy};
use async_nats::jetstream::kv::Store as KvStore;
use async_nats::jetstream::{self, kv, stream, Context as JetStreamContext};
use async_nats::{Client, ConnectOptions, HeaderMap};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Name of the stream carrying the raw canonical events
pub const SALES_RAW_STREAM: &str = "SALES_RAW";

/// Errors that can occur when working with NATS
#[derive(Debug, Error)]
pub enum NatsError {
    /// Failed to establish connection to NATS server
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Error occurred in JetStream operations
    #[error("JetStream error: {0}")]
    JetStreamError(String),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<NatsError> for crate::errors::PipelineError {
    fn from(err: NatsError) -> Self {
        crate::errors::PipelineError::TransportError(err.to_string())
    }
}

/// Configuration for the NATS client connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,

    /// Optional username for authentication
    pub user: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Reconnect interval in seconds
    pub reconnect_interval_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            user: None,
            password: None,
            connection_timeout_secs: 10,
            reconnect_interval_secs: 5,
        }
    }
}

/// NATS client wrapper with JetStream support
#[derive(Debug, Clone)]
pub struct PipelineNats {
    client: Client,
    jetstream: JetStreamContext,
}

impl PipelineNats {
    /// Connect to the broker with the provided configuration
    pub async fn connect(config: &NatsConfig) -> Result<Self, NatsError> {
        let reconnect_interval = config.reconnect_interval_secs;
        let mut options = ConnectOptions::new()
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .reconnect_delay_callback(move |_attempts| Duration::from_secs(reconnect_interval))
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => warn!("NATS disconnected"),
                    async_nats::Event::Connected => info!("NATS connected"),
                    async_nats::Event::ClientError(err) => error!("NATS client error: {err}"),
                    _ => {}
                }
            });

        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }

        let client = options.connect(&config.url).await.map_err(|e| {
            NatsError::ConnectionFailed(format!("Failed to connect to {}: {}", config.url, e))
        })?;

        let jetstream = jetstream::new(client.clone());

        Ok(Self { client, jetstream })
    }

    /// The underlying core NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The JetStream context
    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    /// Create the raw-events stream if it does not exist yet
    pub async fn ensure_sales_stream(&self) -> Result<(), NatsError> {
        self.jetstream
            .get_or_create_stream(stream::Config {
                name: SALES_RAW_STREAM.to_string(),
                subjects: vec!["sales.raw.>".to_string()],
                retention: stream::RetentionPolicy::Limits,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| NatsError::JetStreamError(e.to_string()))?;
        Ok(())
    }

    /// Open (or create) a KV bucket
    pub async fn kv_bucket(&self, bucket: &str) -> Result<KvStore, NatsError> {
        self.jetstream
            .create_key_value(kv::Config {
                bucket: bucket.to_string(),
                history: 1,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| NatsError::JetStreamError(e.to_string()))
    }

    /// Publish a payload with correlation headers to a subject
    pub async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HeaderMap,
        payload: Vec<u8>,
    ) -> Result<(), NatsError> {
        self.jetstream
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(|e| NatsError::JetStreamError(e.to_string()))?
            .await
            .map_err(|e| NatsError::JetStreamError(e.to_string()))?;
        Ok(())
    }

    /// Build a durable pull consumer filtered to one raw subject
    pub async fn raw_subject_consumer(
        &self,
        durable_name: &str,
        subject: &str,
    ) -> Result<Consumer<pull::Config>, NatsError> {
        let stream = self
            .jetstream
            .get_stream(SALES_RAW_STREAM)
            .await
            .map_err(|e| NatsError::JetStreamError(e.to_string()))?;

        stream
            .get_or_create_consumer(
                durable_name,
                pull::Config {
                    durable_name: Some(durable_name.to_string()),
                    filter_subject: subject.to_string(),
                    deliver_policy: DeliverPolicy::All,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| NatsError::JetStreamError(e.to_string()))
    }
}

/// Pump one source's consumer into a [`SaleRecord`] channel.
///
/// Decodes and validates each message; malformed payloads are counted,
/// acked and skipped so they are never redelivered. Messages are acked only
/// after the record is handed to the channel (at-least-once; downstream
/// checkpoints and idempotent upserts absorb redelivery). The task ends
/// when the channel's receiver side is dropped.
pub fn spawn_raw_reader(
    consumer: Consumer<pull::Config>,
    sender: mpsc::Sender<SaleRecord>,
    metrics: Arc<PipelineMetrics>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut messages = match consumer.messages().await {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to open consumer message stream: {e}");
                return;
            }
        };

        while let Some(message) = messages.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!("Consumer stream error: {e}");
                    continue;
                }
            };
            let offset = match message.info() {
                Ok(info) => info.stream_sequence,
                Err(e) => {
                    warn!("Message without stream info: {e}");
                    continue;
                }
            };
            let position = StreamPosition {
                topic: message.subject.to_string(),
                partition: 0,
                offset,
            };

            match SaleEvent::from_json(&message.payload) {
                Ok(event) => {
                    let headers = message.headers.clone().unwrap_or_default();
                    let record = SaleRecord {
                        position,
                        headers,
                        event,
                    };
                    if sender.send(record).await.is_err() {
                        // Receiver gone: the pipeline is shutting down
                        return;
                    }
                }
                Err(e) => {
                    metrics.record_event_malformed();
                    warn!(position = %position, "Dropping undecodable message: {e}");
                }
            }

            if let Err(e) = message.ack().await {
                warn!("Failed to ack message: {e}");
            }
        }
    })
}
