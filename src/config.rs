// Copyright 2025 Cowboy AI, LLC.

//! Pipeline configuration
//!
//! Environment-style configuration with local-development defaults. Every
//! knob can be overridden through `PIPELINE_*` variables; invalid values are
//! a fatal startup error, caught by [`PipelineConfig::validate`] before any
//! worker starts.

use crate::errors::{PipelineError, PipelineResult};
use crate::infrastructure::NatsConfig;
use crate::topology::SinkRetryPolicy;
use crate::window::TumblingWindows;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Top-level configuration for all pipeline components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Broker connection settings
    pub nats: NatsConfig,

    /// Directory the file connector watches for drops
    pub watch_directory: PathBuf,

    /// Directory processed files are archived into
    pub archive_directory: PathBuf,

    /// Poll interval for the remote SOAP source, in seconds
    pub poll_interval_secs: u64,

    /// Tumbling window width, in seconds
    pub window_size_secs: i64,

    /// Capacity of the per-source event channels
    pub channel_capacity: usize,

    /// Capacity of the connector-side dedup store
    pub dedup_capacity: usize,

    /// How many times a retryable sink write is retried
    pub sink_retry_attempts: u32,

    /// Delay between sink retries, in milliseconds
    pub sink_retry_delay_ms: u64,

    /// KV bucket backing the city rollup table
    pub city_sink_bucket: String,

    /// KV bucket backing the salesperson rollup table
    pub salesman_sink_bucket: String,

    /// KV bucket backing the lineage audit table
    pub lineage_bucket: String,

    /// KV bucket for processing-position checkpoints
    pub checkpoint_bucket: String,

    /// KV bucket for window-state recovery snapshots
    pub state_bucket: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            watch_directory: PathBuf::from("./data/input"),
            archive_directory: PathBuf::from("./data/archive"),
            poll_interval_secs: 30,
            window_size_secs: 3_600,
            channel_capacity: 256,
            dedup_capacity: crate::dedup::DEFAULT_DEDUP_CAPACITY,
            sink_retry_attempts: 3,
            sink_retry_delay_ms: 500,
            city_sink_bucket: "top_sales_by_city".to_string(),
            salesman_sink_bucket: "top_salesman_country".to_string(),
            lineage_bucket: "data_lineage".to_string(),
            checkpoint_bucket: "pipeline_checkpoints".to_string(),
            state_bucket: "window_state".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Build a configuration from the environment, falling back to the
    /// local-development defaults for anything unset
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("PIPELINE_BROKER_URL") {
            config.nats.url = url;
        }
        if let Ok(dir) = env::var("PIPELINE_WATCH_DIR") {
            config.watch_directory = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("PIPELINE_ARCHIVE_DIR") {
            config.archive_directory = PathBuf::from(dir);
        }
        if let Some(secs) = env_parse("PIPELINE_POLL_INTERVAL_SECS") {
            config.poll_interval_secs = secs;
        }
        if let Some(secs) = env_parse("PIPELINE_WINDOW_SECS") {
            config.window_size_secs = secs;
        }
        if let Some(capacity) = env_parse("PIPELINE_CHANNEL_CAPACITY") {
            config.channel_capacity = capacity;
        }
        if let Some(capacity) = env_parse("PIPELINE_DEDUP_CAPACITY") {
            config.dedup_capacity = capacity;
        }

        config
    }

    /// Validate the configuration; errors are fatal at startup
    pub fn validate(&self) -> PipelineResult<()> {
        if self.window_size_secs <= 0 {
            return Err(PipelineError::config(format!(
                "window size must be positive, got {}s",
                self.window_size_secs
            )));
        }
        if self.channel_capacity == 0 {
            return Err(PipelineError::config("channel capacity must be positive"));
        }
        if self.poll_interval_secs == 0 {
            return Err(PipelineError::config("poll interval must be positive"));
        }
        Ok(())
    }

    /// The window assigner this configuration describes
    pub fn windows(&self) -> PipelineResult<TumblingWindows> {
        TumblingWindows::of_size(Duration::seconds(self.window_size_secs))
    }

    /// The sink retry policy this configuration describes
    pub fn sink_retry(&self) -> SinkRetryPolicy {
        SinkRetryPolicy {
            attempts: self.sink_retry_attempts,
            delay: std::time::Duration::from_millis(self.sink_retry_delay_ms),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.parse().ok())
}
