//! # Stage Execution
//!
//! One long-lived tokio task per stage: the reader, every processor node and
//! the writer. Workers poll their upstream, hand records downstream through
//! the bounded buffers with [`ProducePolicy`], classify stage errors against
//! the stage's interrupt set and settle their own state slot on exit.
//!
//! Lifecycle requests go through [`TaskExecutor`], which owns the join
//! handles and the cancellation signal shared by a task's workers.

pub mod executor;
pub mod processor_executor;
pub mod reader_executor;
pub mod retry;
pub mod writer_executor;

pub use executor::TaskExecutor;
pub use retry::ProducePolicy;

use crate::context::TaskContext;
use crate::error::StageError;
use crate::events::{Cause, TaskEvent, TaskEventKind};
use crate::logging::log_stage_operation;
use crate::state_machine::TaskState;
use crate::task::ManagedTask;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Position of a stage in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Reader,
    /// Zero-based index in the processor chain
    Processor(usize),
    Writer,
}

impl StageKind {
    /// Cause reported when the stage call itself fails
    pub fn failure_cause(&self) -> Cause {
        match self {
            Self::Reader => Cause::ReaderFailed,
            Self::Processor(_) => Cause::ProcessorFailed,
            Self::Writer => Cause::WriterFailed,
        }
    }

    /// Cause reported when a record could not be handed downstream
    pub fn buffer_cause(&self) -> Option<Cause> {
        match self {
            Self::Reader => Some(Cause::ReaderToBufferFailed),
            Self::Processor(_) => Some(Cause::ProcessorToBufferFailed),
            Self::Writer => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reader => write!(f, "reader"),
            Self::Processor(index) => write!(f, "processor[{index}]"),
            Self::Writer => write!(f, "writer"),
        }
    }
}

/// How a stage worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageExit {
    /// Loop ended on its own (exhaustion, stop, adopted upstream state or fatal error)
    Completed,
    /// Interrupted by shutdown
    Cancelled,
}

/// Cancellation signal shared by the workers of one task.
#[derive(Debug, Default)]
pub struct StageControl {
    cancelled: AtomicBool,
    notify: Notify,
}

impl StageControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// What every stage worker of one task shares.
#[derive(Clone)]
pub(crate) struct StageEnv {
    pub task: Arc<dyn ManagedTask>,
    pub context: Arc<TaskContext>,
    pub control: Arc<StageControl>,
    pub idle_poll: Duration,
}

impl StageEnv {
    pub fn new(
        task: Arc<dyn ManagedTask>,
        control: Arc<StageControl>,
        idle_poll: Duration,
    ) -> Self {
        let context = Arc::clone(task.context());
        Self {
            task,
            context,
            control,
            idle_poll,
        }
    }

    pub fn task_id(&self) -> &str {
        self.context.task_id()
    }

    fn publish(&self, kind: TaskEventKind) {
        self.context
            .dispatcher()
            .dispatch(TaskEvent::new(kind, Arc::clone(&self.task)));
    }

    /// Record-level problem: logged, published as a warning, loop continues.
    pub fn warn(&self, stage: StageKind, cause: Cause, error: StageError) {
        warn!(
            task_id = %self.task_id(),
            stage = %stage,
            cause = %cause,
            category = %error.category(),
            error = %error,
            "⚠️ Stage warning"
        );
        self.publish(TaskEventKind::Warning {
            cause,
            error: Arc::new(error),
        });
    }

    /// Stage-fatal error. Only published if this call moved the stage to `FAILED`.
    pub fn fail(&self, stage: StageKind, cause: Cause, error: StageError) {
        let settled = self
            .context
            .state_of(stage)
            .map(|holder| holder.settle(TaskState::Failed));
        if settled != Some(TaskState::Failed) {
            return;
        }
        error!(
            task_id = %self.task_id(),
            stage = %stage,
            cause = %cause,
            category = %error.category(),
            error = %error,
            "❌ Stage failed"
        );
        self.publish(TaskEventKind::Failed {
            cause,
            error: Arc::new(error),
        });
    }

    pub fn finish(&self) {
        let counters = self.context.counters().snapshot();
        info!(
            task_id = %self.task_id(),
            read = counters.read,
            processed = counters.processed,
            written = counters.written,
            dropped = counters.dropped,
            read_dropped = counters.read_dropped,
            "✅ Task finished"
        );
        self.publish(TaskEventKind::Finished);
    }

    /// Back off while polling an empty buffer.
    pub async fn idle(&self) {
        if self.idle_poll.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.idle_poll).await;
        }
    }

    /// Settle `stage` to `state` unless it already reached a terminal state.
    pub fn settle(&self, stage: StageKind, state: TaskState) -> TaskState {
        let settled = self
            .context
            .state_of(stage)
            .map_or(state, |holder| holder.settle(state));
        log_stage_operation(self.task_id(), &stage.to_string(), "settled", &settled.to_string());
        settled
    }

    pub fn state(&self, stage: StageKind) -> TaskState {
        self.context
            .state_of(stage)
            .map_or(TaskState::Failed, |holder| holder.get())
    }
}

/// Marks a stage `FAILED` if its worker unwinds from a panic, so downstream
/// stages stop waiting on it.
pub(crate) struct StageGuard {
    env: StageEnv,
    stage: StageKind,
}

impl StageGuard {
    pub fn new(env: &StageEnv, stage: StageKind) -> Self {
        log_stage_operation(env.task_id(), &stage.to_string(), "started", "running");
        Self {
            env: env.clone(),
            stage,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.env.fail(
                self.stage,
                self.stage.failure_cause(),
                StageError::new(
                    crate::error::ErrorCategory::Unknown,
                    format!("{} worker panicked", self.stage),
                ),
            );
        }
        log_stage_operation(
            self.env.task_id(),
            &self.stage.to_string(),
            "exited",
            &self.env.state(self.stage).to_string(),
        );
    }
}
