//! Reader stage worker: external source to read buffer.

use super::{ProducePolicy, StageEnv, StageExit, StageGuard, StageKind};
use crate::buffer::DataBuffer;
use crate::config::StageConfig;
use crate::events::Cause;
use crate::reader::Reader;
use crate::state_machine::TaskState;
use std::sync::Arc;
use tracing::{debug, warn};

const STAGE: StageKind = StageKind::Reader;

pub(crate) async fn run_reader<I: Send + 'static>(
    env: StageEnv,
    reader: Arc<dyn Reader<I>>,
    output: Arc<DataBuffer<I>>,
    config: StageConfig,
) -> StageExit {
    let _guard = StageGuard::new(&env, STAGE);

    let exit = tokio::select! {
        biased;
        _ = env.control.cancelled() => {
            env.settle(STAGE, TaskState::Terminated);
            StageExit::Cancelled
        }
        _ = reader_loop(&env, reader.as_ref(), &output, &config) => StageExit::Completed,
    };

    if env.state(STAGE).is_final_state() {
        if let Err(error) = reader.destroy(&env.context).await {
            warn!(task_id = %env.task_id(), error = %error, "Reader destroy hook failed");
        }
    }
    exit
}

async fn reader_loop<I: Send + 'static>(
    env: &StageEnv,
    reader: &dyn Reader<I>,
    output: &DataBuffer<I>,
    config: &StageConfig,
) {
    let ctx = env.context.as_ref();
    let state = ctx.reader_state();
    let policy = ProducePolicy::from_config(config);

    if let Err(error) = reader.initialize(ctx).await {
        if config.should_interrupt_for(&error) {
            env.fail(STAGE, Cause::ReaderFailed, error);
            return;
        }
        env.warn(STAGE, Cause::ReaderFailed, error);
    }

    while state.get() == TaskState::Running {
        if env.control.is_cancelled() {
            state.settle(TaskState::Terminated);
            return;
        }

        let chunk = match reader.read(ctx).await {
            Ok(chunk) => chunk,
            Err(error) if config.should_interrupt_for(&error) => {
                env.fail(STAGE, Cause::ReaderFailed, error);
                return;
            }
            Err(error) => {
                env.warn(STAGE, Cause::ReaderFailed, error);
                env.idle().await;
                continue;
            }
        };

        if chunk.is_empty() {
            debug!(task_id = %env.task_id(), "Reader exhausted");
            env.settle(STAGE, TaskState::Terminated);
            break;
        }

        for record in chunk {
            match policy.produce(output, record).await {
                Ok(()) => ctx.counters().incr_read(1),
                Err(error) => {
                    ctx.counters().incr_read_dropped(1);
                    env.warn(STAGE, Cause::ReaderToBufferFailed, error);
                }
            }
        }
    }
}
