// Copyright 2025 Cowboy AI, LLC.

//! Tumbling time windows
//!
//! Fixed-width, non-overlapping, half-open intervals `[start, end)` used to
//! bucket events for aggregation. An event whose time equals `end` belongs
//! to the next window; there is no grace period.

use crate::errors::{PipelineError, PipelineResult};
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Boundaries of one tumbling window, half-open `[start, end)`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct WindowBounds {
    /// Inclusive start (epoch milliseconds)
    pub start: i64,
    /// Exclusive end (epoch milliseconds)
    pub end: i64,
}

impl WindowBounds {
    /// Whether the given instant falls inside this window
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let ms = ts.timestamp_millis();
        self.start <= ms && ms < self.end
    }
}

impl fmt::Display for WindowBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Assigns events to fixed-width tumbling windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumblingWindows {
    size_millis: i64,
}

impl TumblingWindows {
    /// One-hour windows, the width both rollup dimensions use
    pub fn hourly() -> Self {
        Self {
            size_millis: 3_600_000,
        }
    }

    /// Windows of the given size; zero or negative sizes are a fatal
    /// configuration error
    pub fn of_size(size: Duration) -> PipelineResult<Self> {
        let size_millis = size.num_milliseconds();
        if size_millis <= 0 {
            return Err(PipelineError::config(format!(
                "window size must be positive, got {size_millis}ms"
            )));
        }
        Ok(Self { size_millis })
    }

    /// Window width in milliseconds
    pub fn size_millis(&self) -> i64 {
        self.size_millis
    }

    /// The window the given event time falls into.
    ///
    /// Start is the event time floored to the window grid, so an event at
    /// exactly a window's end boundary lands in the next window.
    pub fn window_for(&self, ts: DateTime<Utc>) -> WindowBounds {
        let ms = ts.timestamp_millis();
        let start = ms.div_euclid(self.size_millis) * self.size_millis;
        WindowBounds {
            start,
            end: start + self.size_millis,
        }
    }
}
