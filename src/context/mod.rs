//! # Task Context
//!
//! Per-task shared state: the stage state slots, counters, parameters and
//! the event dispatcher. Buffers are not stored here; each one is handed only
//! to the producing and the consuming stage worker when the task is wired.

pub mod parameters;

pub use parameters::TaskParameters;

use crate::events::EventDispatcher;
use crate::execution::StageKind;
use crate::state_machine::{StateHolder, TaskState};
use crate::task::ManagedTask;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Expected number of records, when the source knows it up front.
#[derive(Clone, Default)]
pub enum TotalHint {
    #[default]
    Unknown,
    Fixed(u64),
    Supplied(Arc<dyn Fn() -> u64 + Send + Sync>),
}

impl TotalHint {
    pub fn resolve(&self) -> Option<u64> {
        match self {
            Self::Unknown => None,
            Self::Fixed(total) => Some(*total),
            Self::Supplied(supplier) => Some(supplier()),
        }
    }
}

impl fmt::Debug for TotalHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Fixed(total) => f.debug_tuple("Fixed").field(total).finish(),
            Self::Supplied(_) => write!(f, "Supplied(..)"),
        }
    }
}

/// Monotonic record counters.
///
/// `read` counts records that entered the read buffer. Records lost after
/// that point, either in a batch a processor failed on or after a
/// processor exhausted its produce retries, count as `dropped`. Once the
/// task settles, `read == processed + dropped` for a chain of one-to-one
/// processors. Records the reader could never buffer count as
/// `read_dropped` and never as `read`.
#[derive(Debug, Default)]
pub struct TaskCounters {
    read: AtomicU64,
    processed: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    read_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub read: u64,
    pub processed: u64,
    pub written: u64,
    pub dropped: u64,
    pub read_dropped: u64,
}

impl CounterSnapshot {
    /// Records read but neither processed nor dropped yet.
    pub fn in_flight(&self) -> u64 {
        self.read.saturating_sub(self.processed + self.dropped)
    }
}

impl TaskCounters {
    pub fn incr_read(&self, n: u64) {
        self.read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_written(&self, n: u64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_read_dropped(&self, n: u64) {
        self.read_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn read_count(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn written_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn read_dropped_count(&self) -> u64 {
        self.read_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            read: self.read_count(),
            processed: self.processed_count(),
            written: self.written_count(),
            dropped: self.dropped_count(),
            read_dropped: self.read_dropped_count(),
        }
    }
}

pub struct TaskContext {
    task_id: String,
    parameters: TaskParameters,
    total: TotalHint,
    reader_state: StateHolder,
    processor_states: Vec<StateHolder>,
    writer_state: StateHolder,
    counters: TaskCounters,
    dispatcher: Arc<EventDispatcher>,
    task: OnceLock<Weak<dyn ManagedTask>>,
    created_at: DateTime<Utc>,
}

impl TaskContext {
    /// Context for a pipeline with `processor_count` processor stages.
    pub fn new(
        task_id: impl Into<String>,
        processor_count: usize,
        parameters: TaskParameters,
        total: TotalHint,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            parameters,
            total,
            reader_state: StateHolder::new(),
            processor_states: (0..processor_count).map(|_| StateHolder::new()).collect(),
            writer_state: StateHolder::new(),
            counters: TaskCounters::default(),
            dispatcher,
            task: OnceLock::new(),
            created_at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn parameters(&self) -> &TaskParameters {
        &self.parameters
    }

    pub fn total(&self) -> Option<u64> {
        self.total.resolve()
    }

    pub fn counters(&self) -> &TaskCounters {
        &self.counters
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The owning task, while it is alive.
    pub fn task(&self) -> Option<Arc<dyn ManagedTask>> {
        self.task.get().and_then(Weak::upgrade)
    }

    pub(crate) fn bind_task(&self, task: Weak<dyn ManagedTask>) {
        let _ = self.task.set(task);
    }

    pub fn reader_state(&self) -> &StateHolder {
        &self.reader_state
    }

    pub fn writer_state(&self) -> &StateHolder {
        &self.writer_state
    }

    pub fn processor_state(&self, index: usize) -> Option<&StateHolder> {
        self.processor_states.get(index)
    }

    pub fn processor_count(&self) -> usize {
        self.processor_states.len()
    }

    /// The stage whose buffer feeds `stage`; `None` for the reader.
    pub fn upstream_of(&self, stage: StageKind) -> Option<StageKind> {
        match stage {
            StageKind::Reader => None,
            StageKind::Processor(0) => Some(StageKind::Reader),
            StageKind::Processor(index) => Some(StageKind::Processor(index - 1)),
            StageKind::Writer => Some(
                self.processor_count()
                    .checked_sub(1)
                    .map_or(StageKind::Reader, StageKind::Processor),
            ),
        }
    }

    pub fn state_of(&self, stage: StageKind) -> Option<&StateHolder> {
        match stage {
            StageKind::Reader => Some(&self.reader_state),
            StageKind::Processor(index) => self.processor_states.get(index),
            StageKind::Writer => Some(&self.writer_state),
        }
    }

    /// Every stage in pipeline order.
    pub fn stages(&self) -> Vec<StageKind> {
        std::iter::once(StageKind::Reader)
            .chain((0..self.processor_states.len()).map(StageKind::Processor))
            .chain(std::iter::once(StageKind::Writer))
            .collect()
    }

    pub fn stage_states(&self) -> Vec<(StageKind, TaskState)> {
        self.stages()
            .into_iter()
            .filter_map(|stage| self.state_of(stage).map(|holder| (stage, holder.get())))
            .collect()
    }

    fn holders(&self) -> impl Iterator<Item = &StateHolder> {
        std::iter::once(&self.reader_state)
            .chain(self.processor_states.iter())
            .chain(std::iter::once(&self.writer_state))
    }

    /// All stages reached `TERMINATED`.
    pub fn is_terminated(&self) -> bool {
        self.holders().all(|holder| holder.get() == TaskState::Terminated)
    }

    pub fn has_failed(&self) -> bool {
        self.holders().any(|holder| holder.get() == TaskState::Failed)
    }

    /// Every stage is in `TERMINATED` or `FAILED`.
    pub fn is_finished(&self) -> bool {
        self.holders().all(|holder| holder.get().is_final_state())
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("states", &self.stage_states())
            .field("counters", &self.counters.snapshot())
            .field("total", &self.total)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;

    fn context(processors: usize) -> TaskContext {
        let dispatcher =
            EventDispatcher::new(&DispatcherConfig::default(), &tokio::runtime::Handle::current());
        TaskContext::new(
            "ctx-test",
            processors,
            TaskParameters::new(),
            TotalHint::Fixed(42),
            dispatcher,
        )
    }

    #[tokio::test]
    async fn test_stage_listing() {
        let ctx = context(2);
        assert_eq!(
            ctx.stages(),
            vec![
                StageKind::Reader,
                StageKind::Processor(0),
                StageKind::Processor(1),
                StageKind::Writer
            ]
        );
        assert!(ctx.state_of(StageKind::Processor(2)).is_none());
        assert_eq!(ctx.total(), Some(42));
    }

    #[tokio::test]
    async fn test_terminated_and_failed() {
        let ctx = context(1);
        assert!(!ctx.is_terminated());
        for stage in ctx.stages() {
            ctx.state_of(stage).unwrap().force(TaskState::Terminated);
        }
        assert!(ctx.is_terminated());
        assert!(!ctx.has_failed());

        ctx.processor_state(0).unwrap().force(TaskState::Failed);
        assert!(!ctx.is_terminated());
        assert!(ctx.has_failed());
        assert!(ctx.is_finished());
    }

    #[tokio::test]
    async fn test_counters_snapshot() {
        let ctx = context(1);
        ctx.counters().incr_read(5);
        ctx.counters().incr_processed(4);
        ctx.counters().incr_written(3);
        ctx.counters().incr_dropped(1);
        ctx.counters().incr_read_dropped(2);
        let snapshot = ctx.counters().snapshot();
        assert_eq!(
            snapshot,
            CounterSnapshot {
                read: 5,
                processed: 4,
                written: 3,
                dropped: 1,
                read_dropped: 2,
            }
        );
        assert_eq!(snapshot.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_upstream_of() {
        let ctx = context(2);
        assert_eq!(ctx.upstream_of(StageKind::Reader), None);
        assert_eq!(ctx.upstream_of(StageKind::Processor(0)), Some(StageKind::Reader));
        assert_eq!(
            ctx.upstream_of(StageKind::Processor(1)),
            Some(StageKind::Processor(0))
        );
        assert_eq!(ctx.upstream_of(StageKind::Writer), Some(StageKind::Processor(1)));
        assert_eq!(context(0).upstream_of(StageKind::Writer), Some(StageKind::Reader));
    }

    #[test]
    fn test_supplied_total() {
        let hint = TotalHint::Supplied(Arc::new(|| 7));
        assert_eq!(hint.resolve(), Some(7));
        assert_eq!(TotalHint::Unknown.resolve(), None);
    }
}
