//! Processor stage worker: upstream buffer through one processor to the
//! next buffer. A chain of N processors runs N of these.

use super::{ProducePolicy, StageEnv, StageExit, StageGuard, StageKind};
use crate::buffer::DataBuffer;
use crate::chunk::DataChunk;
use crate::config::StageConfig;
use crate::events::Cause;
use crate::processor::Processor;
use crate::state_machine::TaskState;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

/// A processor bound to its input and output buffers, type-erased so a
/// chain of differently-typed links can be held in one list.
pub(crate) trait NodeLauncher: Send + Sync {
    fn name(&self) -> &'static str;

    fn config_override(&self) -> Option<StageConfig>;

    fn launch(
        &self,
        env: StageEnv,
        index: usize,
        is_tail: bool,
        config: StageConfig,
    ) -> BoxFuture<'static, StageExit>;
}

pub(crate) struct ProcessorNode<A, B> {
    processor: Arc<dyn Processor<A, B>>,
    input: Arc<DataBuffer<A>>,
    output: Arc<DataBuffer<B>>,
}

impl<A: Send + 'static, B: Send + 'static> ProcessorNode<A, B> {
    pub fn new(
        processor: Arc<dyn Processor<A, B>>,
        input: Arc<DataBuffer<A>>,
        output: Arc<DataBuffer<B>>,
    ) -> Self {
        Self {
            processor,
            input,
            output,
        }
    }
}

impl<A: Send + 'static, B: Send + 'static> NodeLauncher for ProcessorNode<A, B> {
    fn name(&self) -> &'static str {
        self.processor.name()
    }

    fn config_override(&self) -> Option<StageConfig> {
        self.processor.config()
    }

    fn launch(
        &self,
        env: StageEnv,
        index: usize,
        is_tail: bool,
        config: StageConfig,
    ) -> BoxFuture<'static, StageExit> {
        run_processor(
            env,
            index,
            is_tail,
            Arc::clone(&self.processor),
            Arc::clone(&self.input),
            Arc::clone(&self.output),
            config,
        )
        .boxed()
    }
}

async fn run_processor<A: Send + 'static, B: Send + 'static>(
    env: StageEnv,
    index: usize,
    is_tail: bool,
    processor: Arc<dyn Processor<A, B>>,
    input: Arc<DataBuffer<A>>,
    output: Arc<DataBuffer<B>>,
    config: StageConfig,
) -> StageExit {
    let stage = StageKind::Processor(index);
    let _guard = StageGuard::new(&env, stage);

    tokio::select! {
        biased;
        _ = env.control.cancelled() => {
            env.settle(stage, TaskState::Terminated);
            StageExit::Cancelled
        }
        _ = processor_loop(&env, stage, is_tail, processor.as_ref(), &input, &output, &config) => {
            StageExit::Completed
        }
    }
}

async fn processor_loop<A: Send + 'static, B: Send + 'static>(
    env: &StageEnv,
    stage: StageKind,
    is_tail: bool,
    processor: &dyn Processor<A, B>,
    input: &DataBuffer<A>,
    output: &DataBuffer<B>,
    config: &StageConfig,
) {
    let ctx = env.context.as_ref();
    let upstream = ctx.upstream_of(stage).unwrap_or(StageKind::Reader);
    let policy = ProducePolicy::from_config(config);

    // The upstream state must be read before the buffer: once it is seen
    // terminal, every record it produced is already visible.
    while env.state(upstream) == TaskState::Running || !input.is_empty() {
        if env.control.is_cancelled() {
            env.settle(stage, TaskState::Terminated);
            return;
        }

        let batch = input.consume_if_possible(config.max_consume_count);
        if batch.is_empty() {
            env.idle().await;
            continue;
        }

        let consumed = batch.len() as u64;
        let outputs = match processor.process(ctx, DataChunk::new(batch)).await {
            Ok(outputs) => outputs,
            Err(error) if config.should_interrupt_for(&error) => {
                ctx.counters().incr_dropped(consumed);
                env.fail(stage, Cause::ProcessorFailed, error);
                return;
            }
            Err(error) => {
                ctx.counters().incr_dropped(consumed);
                env.warn(stage, Cause::ProcessorFailed, error);
                continue;
            }
        };

        for record in outputs {
            match policy.produce(output, record).await {
                Ok(()) => {
                    if is_tail {
                        ctx.counters().incr_processed(1);
                    }
                }
                Err(error) => {
                    ctx.counters().incr_dropped(1);
                    env.warn(stage, Cause::ProcessorToBufferFailed, error);
                }
            }
        }
    }

    env.settle(stage, env.state(upstream));
}
