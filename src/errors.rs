// Copyright 2025 Cowboy AI, LLC.

//! Error types for pipeline operations

use thiserror::Error;

/// Errors that can occur while running the pipeline
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Configuration is invalid; fatal before any worker starts
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Failed to reach the message broker
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A record could not be decoded or failed validation
    #[error("Malformed event: {reason}")]
    MalformedEvent {
        /// Why the event was rejected
        reason: String,
    },

    /// Writing a snapshot to the sink failed
    #[error("Sink error: {0}")]
    SinkError(String),

    /// Persisting or loading window state failed
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Writing or merging a lineage record failed
    #[error("Lineage store error: {0}")]
    LineageStoreError(String),

    /// Saving or loading a processing-position checkpoint failed
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::SerializationError(err.to_string())
    }
}

impl From<crate::infrastructure::sink::SinkError> for PipelineError {
    fn from(err: crate::infrastructure::sink::SinkError) -> Self {
        PipelineError::SinkError(err.to_string())
    }
}

impl From<crate::state_store::StateStoreError> for PipelineError {
    fn from(err: crate::state_store::StateStoreError) -> Self {
        PipelineError::StateStoreError(err.to_string())
    }
}

impl From<crate::infrastructure::lineage_store::LineageStoreError> for PipelineError {
    fn from(err: crate::infrastructure::lineage_store::LineageStoreError) -> Self {
        PipelineError::LineageStoreError(err.to_string())
    }
}

impl From<crate::infrastructure::checkpoint::CheckpointError> for PipelineError {
    fn from(err: crate::infrastructure::checkpoint::CheckpointError) -> Self {
        PipelineError::CheckpointError(err.to_string())
    }
}

impl PipelineError {
    /// Create a malformed-event error
    pub fn malformed(reason: impl Into<String>) -> Self {
        PipelineError::MalformedEvent {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::ConfigurationError(msg.into())
    }

    /// Whether retrying the failed operation can succeed.
    ///
    /// Transient I/O (transport, sink, stores) is retryable; malformed and
    /// late events never are, and configuration errors are fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransportError(_)
                | PipelineError::SinkError(_)
                | PipelineError::StateStoreError(_)
                | PipelineError::LineageStoreError(_)
                | PipelineError::CheckpointError(_)
        )
    }

    /// Whether the process should exit rather than continue serving traffic
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::ConfigurationError(_))
    }
}
