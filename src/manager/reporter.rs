//! Periodic task reports and the reporters that receive them.

use crate::context::{CounterSnapshot, TaskContext};
use crate::state_machine::TaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Point-in-time view of a task's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub counters: CounterSnapshot,
    pub total: Option<u64>,
    /// `(stage, state)` in pipeline order
    pub states: Vec<(String, TaskState)>,
    pub elapsed_ms: u64,
    pub reported_at: DateTime<Utc>,
}

impl TaskReport {
    pub fn from_context(context: &TaskContext) -> Self {
        let reported_at = Utc::now();
        let elapsed_ms = (reported_at - context.created_at())
            .num_milliseconds()
            .max(0) as u64;
        Self {
            task_id: context.task_id().to_string(),
            counters: context.counters().snapshot(),
            total: context.total(),
            states: context
                .stage_states()
                .into_iter()
                .map(|(stage, state)| (stage.to_string(), state))
                .collect(),
            elapsed_ms,
            reported_at,
        }
    }

    /// Share of the expected total already written, when a total is known.
    pub fn progress(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.counters.written as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Receives a task's report on every reporting tick.
#[async_trait]
pub trait TaskReporter: Send + Sync {
    async fn report(&self, report: &TaskReport) -> anyhow::Result<()>;

    fn reporter_name(&self) -> &str {
        "unnamed_reporter"
    }
}

/// Default reporter: one structured `info!` line per report.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReporter;

#[async_trait]
impl TaskReporter for LoggingReporter {
    async fn report(&self, report: &TaskReport) -> anyhow::Result<()> {
        info!(
            task_id = %report.task_id,
            read = report.counters.read,
            processed = report.counters.processed,
            written = report.counters.written,
            dropped = report.counters.dropped,
            read_dropped = report.counters.read_dropped,
            total = report.total,
            progress = report.progress(),
            elapsed_ms = report.elapsed_ms,
            states = ?report.states,
            "📊 TASK_REPORT"
        );
        Ok(())
    }

    fn reporter_name(&self) -> &str {
        "logging_reporter"
    }
}
