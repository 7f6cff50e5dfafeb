//! Error types for the pipeline engine.
//!
//! Two families live here:
//!
//! - [`TaskError`] covers control-plane failures: illegal lifecycle requests, builder
//!   misconfiguration, missing runtime and worker join failures. These are returned
//!   synchronously to the caller and never enter the pipeline.
//! - [`StageError`] is what readers, processors and writers return. Its
//!   [`ErrorCategory`] decides whether a stage warns and keeps going or fails.

use crate::config::ConfigurationError;
use crate::state_machine::StateTransitionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),
    #[error("Build error: {0}")]
    BuildError(String),
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("Stage {stage} worker is still running")]
    WorkerBusy { stage: String },
    #[error("Stage {stage} worker was cancelled")]
    WorkerCancelled { stage: String },
    #[error("Stage {stage} worker panicked: {message}")]
    WorkerPanicked { stage: String, message: String },
    #[error("Parameter error: {0}")]
    ParameterError(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<ConfigurationError> for TaskError {
    fn from(error: ConfigurationError) -> Self {
        TaskError::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(error: serde_json::Error) -> Self {
        TaskError::ParameterError(format!("JSON serialization error: {error}"))
    }
}

pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Error categories a stage can be configured to treat as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Will never succeed if retried
    Permanent,
    /// May succeed on the next poll
    Transient,
    Timeout,
    RateLimit,
    Network,
    /// Requires operator intervention
    Configuration,
    /// The record itself is malformed
    InvalidData,
    /// A bounded resource (usually a downstream buffer) stayed saturated
    ResourceExhaustion,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Permanent => write!(f, "Permanent"),
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::Timeout => write!(f, "Timeout"),
            ErrorCategory::RateLimit => write!(f, "Rate Limit"),
            ErrorCategory::Network => write!(f, "Network"),
            ErrorCategory::Configuration => write!(f, "Configuration"),
            ErrorCategory::InvalidData => write!(f, "Invalid Data"),
            ErrorCategory::ResourceExhaustion => write!(f, "Resource Exhaustion"),
            ErrorCategory::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Error raised by a reader, processor or writer call.
#[derive(Debug, Error)]
#[error("{category} error: {message}")]
pub struct StageError {
    category: ErrorCategory,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StageError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        category: ErrorCategory,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permanent, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidData, message)
    }

    /// A record could not be handed to a downstream buffer within the retry budget.
    pub fn buffer_saturated(attempts: u32, capacity: usize) -> Self {
        Self::new(
            ErrorCategory::ResourceExhaustion,
            format!("buffer of capacity {capacity} stayed full after {attempts} attempts"),
        )
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for StageError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let category = match error.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ErrorCategory::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => ErrorCategory::Network,
            ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::UnexpectedEof => {
                ErrorCategory::InvalidData
            }
            ErrorKind::NotFound | ErrorKind::PermissionDenied => ErrorCategory::Permanent,
            ErrorKind::Interrupted => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        };
        let message = error.to_string();
        Self::with_source(category, message, error)
    }
}

impl From<serde_json::Error> for StageError {
    fn from(error: serde_json::Error) -> Self {
        let message = format!("JSON error: {error}");
        Self::with_source(ErrorCategory::InvalidData, message, error)
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;
