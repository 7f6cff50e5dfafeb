//! Writer stage worker: write buffer to external sink.

use super::{StageEnv, StageExit, StageGuard, StageKind};
use crate::buffer::DataBuffer;
use crate::chunk::DataChunk;
use crate::config::StageConfig;
use crate::events::Cause;
use crate::state_machine::TaskState;
use crate::writer::Writer;
use std::sync::Arc;
use tracing::warn;

const STAGE: StageKind = StageKind::Writer;

pub(crate) async fn run_writer<O: Send + 'static>(
    env: StageEnv,
    writer: Arc<dyn Writer<O>>,
    input: Arc<DataBuffer<O>>,
    config: StageConfig,
) -> StageExit {
    let _guard = StageGuard::new(&env, STAGE);

    let exit = tokio::select! {
        biased;
        _ = env.control.cancelled() => {
            env.settle(STAGE, TaskState::Terminated);
            StageExit::Cancelled
        }
        _ = writer_loop(&env, writer.as_ref(), &input, &config) => StageExit::Completed,
    };

    if env.state(STAGE).is_final_state() {
        if let Err(error) = writer.destroy(&env.context).await {
            warn!(task_id = %env.task_id(), error = %error, "Writer destroy hook failed");
        }
    }
    if exit == StageExit::Completed && !env.control.is_cancelled() && env.context.is_terminated() {
        env.finish();
    }
    exit
}

async fn writer_loop<O: Send + 'static>(
    env: &StageEnv,
    writer: &dyn Writer<O>,
    input: &DataBuffer<O>,
    config: &StageConfig,
) {
    let ctx = env.context.as_ref();
    let upstream = ctx.upstream_of(STAGE).unwrap_or(StageKind::Reader);

    if let Err(error) = writer.initialize(ctx).await {
        if config.should_interrupt_for(&error) {
            env.fail(STAGE, Cause::WriterFailed, error);
            return;
        }
        env.warn(STAGE, Cause::WriterFailed, error);
    }

    while env.state(upstream) == TaskState::Running || !input.is_empty() {
        if env.control.is_cancelled() {
            env.settle(STAGE, TaskState::Terminated);
            return;
        }

        // The writer flushes everything available as one unit.
        let batch = input.consume_if_possible(input.capacity());
        if batch.is_empty() {
            env.idle().await;
            continue;
        }

        match writer.write(ctx, DataChunk::new(batch)).await {
            Ok(written) => ctx.counters().incr_written(written as u64),
            Err(error) if config.should_interrupt_for(&error) => {
                env.fail(STAGE, Cause::WriterFailed, error);
                return;
            }
            Err(error) => env.warn(STAGE, Cause::WriterFailed, error),
        }
    }

    env.settle(STAGE, env.state(upstream));
}
