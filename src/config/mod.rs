//! # Engine Configuration
//!
//! Typed configuration for the pipeline engine. Every section carries the
//! defaults the engine runs with when no file is present, so a bare
//! `EngineConfig::default()` is a complete, valid configuration.
//!
//! Files are loaded by [`ConfigManager`] from a directory containing
//! `base.yaml` plus an optional `<environment>.yaml` overlay, followed by
//! `PIPELINE__SECTION__FIELD` environment variables.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::error::{ErrorCategory, StageError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Root configuration for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub reader: StageConfig,
    pub processor: StageConfig,
    pub writer: StageConfig,
    pub buffer: BufferConfig,
    pub dispatcher: DispatcherConfig,
    pub reporter: ReporterConfig,
    pub registry: RegistryConfig,
    pub execution: ExecutionConfig,
}

/// Retry and failure policy for one stage class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Attempts to hand a record to the downstream buffer before dropping it
    pub produce_retry_times: u32,
    /// Cap on the wait of a single attempt
    pub produce_wait_ms: u64,
    /// Batch size drained from the upstream buffer per iteration
    pub max_consume_count: usize,
    /// Error categories that fail the stage instead of warning
    pub interrupt_for: HashSet<ErrorCategory>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            produce_retry_times: 10,
            produce_wait_ms: 5_000,
            max_consume_count: 100,
            interrupt_for: HashSet::new(),
        }
    }
}

impl StageConfig {
    pub fn produce_wait(&self) -> Duration {
        Duration::from_millis(self.produce_wait_ms)
    }

    pub fn with_interrupt_for(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.interrupt_for.extend(categories);
        self
    }

    pub fn with_produce_retry(mut self, retry_times: u32, wait: Duration) -> Self {
        self.produce_retry_times = retry_times;
        self.produce_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_max_consume_count(mut self, max_consume_count: usize) -> Self {
        self.max_consume_count = max_consume_count;
        self
    }

    /// Whether `error` is fatal for a stage running with this config.
    pub fn should_interrupt_for(&self, error: &StageError) -> bool {
        self.interrupt_for.contains(&error.category())
    }

    fn validate(&self, section: &str) -> ConfigResult<()> {
        if self.produce_retry_times == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("{section}.produce_retry_times"),
                0,
                "at least one produce attempt is required",
            ));
        }
        if self.max_consume_count == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("{section}.max_consume_count"),
                0,
                "batch size must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Default capacity of the read, write and intermediate chain buffers
    pub buffer_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Backlog of undelivered warning events before new warnings are dropped
    pub buffer_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub report_period_seconds: u64,
    /// Interval of the scheduler sweep
    pub tick_ms: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            report_period_seconds: 60,
            tick_ms: 1_000,
        }
    }
}

impl ReporterConfig {
    pub fn report_period(&self) -> Duration {
        Duration::from_secs(self.report_period_seconds)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub initial_capacity: usize,
    /// `None` means unbounded
    pub maximum_size: Option<usize>,
    pub timeout_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 16,
            maximum_size: None,
            timeout_seconds: 30 * 24 * 60 * 60,
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Sleep between polls of an empty buffer; 0 yields to the scheduler instead
    pub idle_poll_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { idle_poll_ms: 1 }
    }
}

impl ExecutionConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

impl EngineConfig {
    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        self.reader.validate("reader")?;
        self.processor.validate("processor")?;
        self.writer.validate("writer")?;

        if self.buffer.buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "buffer.buffer_size",
                0,
                "buffer capacity must be greater than 0",
            ));
        }
        if self.dispatcher.buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.buffer_size",
                0,
                "event backlog must be greater than 0",
            ));
        }
        if self.reporter.tick_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "reporter.tick_ms",
                0,
                "scheduler tick must be greater than 0",
            ));
        }
        if self.registry.maximum_size == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "registry.maximum_size",
                0,
                "maximum size must be greater than 0 when set",
            ));
        }
        Ok(())
    }

    /// Section for the given stage kind.
    pub fn stage(&self, kind: crate::execution::StageKind) -> &StageConfig {
        use crate::execution::StageKind;
        match kind {
            StageKind::Reader => &self.reader,
            StageKind::Processor(_) => &self.processor,
            StageKind::Writer => &self.writer,
        }
    }
}
