//! Spawning, stopping and joining the stage workers of one task.

use super::{StageControl, StageExit, StageKind};
use crate::context::TaskContext;
use crate::error::{TaskError, TaskResult};
use crate::state_machine::{StateTransitionError, TaskState};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

/// Decrements the live-worker count when a worker future completes or is dropped.
struct LiveWorker(Arc<AtomicUsize>);

impl Drop for LiveWorker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct TaskExecutor {
    handle: Handle,
    control: Arc<StageControl>,
    workers: Mutex<Vec<(StageKind, JoinHandle<StageExit>)>>,
    live: Arc<AtomicUsize>,
}

impl TaskExecutor {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            control: Arc::new(StageControl::new()),
            workers: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn control(&self) -> Arc<StageControl> {
        Arc::clone(&self.control)
    }

    /// Number of stage workers that have not exited yet.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Move every stage to `RUNNING`, call `announce`, then spawn `workers`.
    ///
    /// `announce` runs before any worker exists so nothing a worker publishes
    /// can overtake it.
    pub(crate) fn start(
        &self,
        ctx: &TaskContext,
        announce: impl FnOnce(),
        workers: impl FnOnce() -> Vec<(StageKind, BoxFuture<'static, StageExit>)>,
    ) -> TaskResult<()> {
        let mut slots = self.workers.lock();

        if self.live_workers() > 0 {
            let stage = slots
                .iter()
                .find(|(_, handle)| !handle.is_finished())
                .map_or(StageKind::Reader, |(stage, _)| *stage);
            return Err(TaskError::WorkerBusy {
                stage: stage.to_string(),
            });
        }

        let states = ctx.stage_states();
        if let Some((_, state)) = states.iter().find(|(_, state)| !state.can_run()) {
            return Err(StateTransitionError::new(*state, TaskState::Running).into());
        }
        for (stage, _) in &states {
            if let Some(holder) = ctx.state_of(*stage) {
                holder.transfer(TaskState::Running)?;
            }
        }

        announce();

        slots.clear();
        for (stage, worker) in workers() {
            self.live.fetch_add(1, Ordering::AcqRel);
            let live = LiveWorker(Arc::clone(&self.live));
            let handle = self.handle.spawn(async move {
                let _live = live;
                worker.await
            });
            slots.push((stage, handle));
        }
        debug!(task_id = %ctx.task_id(), workers = slots.len(), "Stage workers spawned");
        Ok(())
    }

    /// Request a graceful stop of every stage that can stop.
    pub(crate) fn stop(&self, ctx: &TaskContext) -> TaskResult<()> {
        let _slots = self.workers.lock();
        let mut moved = 0;
        for (stage, _) in ctx.stage_states() {
            if let Some(holder) = ctx.state_of(stage) {
                if holder.transfer(TaskState::Stopping).is_ok() {
                    moved += 1;
                }
            }
        }
        if moved == 0 {
            return Err(StateTransitionError::new(ctx.reader_state().get(), TaskState::Stopping).into());
        }
        Ok(())
    }

    /// Cancel the workers and force every stage that can shut down to `TERMINATED`.
    ///
    /// The cancellation flag is raised before any state moves, so a worker
    /// that observes a shutdown-induced `TERMINATED` also observes the flag.
    pub(crate) fn shutdown(&self, ctx: &TaskContext) -> TaskResult<()> {
        let _slots = self.workers.lock();
        let states = ctx.stage_states();
        if !states.iter().any(|(_, state)| state.can_shutdown()) {
            return Err(
                StateTransitionError::new(ctx.reader_state().get(), TaskState::Terminated).into(),
            );
        }

        self.control.cancel();
        for (stage, _) in states {
            if let Some(holder) = ctx.state_of(stage) {
                // a worker may already have settled itself after seeing the flag
                let _ = holder.transfer(TaskState::Terminated);
            }
        }
        Ok(())
    }

    /// Wait for the workers of the latest start. The first cancelled or
    /// panicked worker is reported after all of them have exited.
    pub async fn join(&self) -> TaskResult<()> {
        let workers = std::mem::take(&mut *self.workers.lock());
        let mut outcome = Ok(());
        for (stage, handle) in workers {
            let result = match handle.await {
                Ok(StageExit::Completed) => Ok(()),
                Ok(StageExit::Cancelled) => Err(TaskError::WorkerCancelled {
                    stage: stage.to_string(),
                }),
                Err(error) => Err(join_error(stage, error)),
            };
            if outcome.is_ok() {
                outcome = result;
            }
        }
        outcome
    }
}

fn join_error(stage: StageKind, error: JoinError) -> TaskError {
    if error.is_panic() {
        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        TaskError::WorkerPanicked {
            stage: stage.to_string(),
            message,
        }
    } else {
        TaskError::WorkerCancelled {
            stage: stage.to_string(),
        }
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("live_workers", &self.live_workers())
            .field("cancelled", &self.control.is_cancelled())
            .finish()
    }
}
