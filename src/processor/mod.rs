//! Transformation stages and the chain that links them.

pub mod chain;

pub use chain::ProcessorChain;

use crate::chunk::DataChunk;
use crate::config::StageConfig;
use crate::context::TaskContext;
use crate::error::StageResult;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Transforms a batch of records. May keep state across calls within a task.
#[async_trait]
pub trait Processor<I: Send + 'static, O: Send + 'static>: Send + Sync + 'static {
    async fn process(&self, ctx: &TaskContext, chunk: DataChunk<I>) -> StageResult<DataChunk<O>>;

    /// Stage policy override; `None` uses the engine's `processor` section.
    fn config(&self) -> Option<StageConfig> {
        None
    }

    /// Name reported by chain introspection and stage logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Identity processor for pipelines that only move data.
pub struct PassThrough<T> {
    _records: PhantomData<fn(T) -> T>,
}

impl<T> PassThrough<T> {
    pub fn new() -> Self {
        Self {
            _records: PhantomData,
        }
    }
}

impl<T> Default for PassThrough<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Processor<T, T> for PassThrough<T> {
    async fn process(&self, _ctx: &TaskContext, chunk: DataChunk<T>) -> StageResult<DataChunk<T>> {
        Ok(chunk)
    }

    fn name(&self) -> &'static str {
        "pass_through"
    }
}

/// Processor backed by a synchronous batch closure.
pub struct FnProcessor<I, O, F> {
    name: &'static str,
    callback: F,
    _records: PhantomData<fn(I) -> O>,
}

pub fn processor_fn<I, O, F>(name: &'static str, callback: F) -> FnProcessor<I, O, F>
where
    F: Fn(DataChunk<I>) -> StageResult<DataChunk<O>> + Send + Sync + 'static,
{
    FnProcessor {
        name,
        callback,
        _records: PhantomData,
    }
}

#[async_trait]
impl<I, O, F> Processor<I, O> for FnProcessor<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(DataChunk<I>) -> StageResult<DataChunk<O>> + Send + Sync + 'static,
{
    async fn process(&self, _ctx: &TaskContext, chunk: DataChunk<I>) -> StageResult<DataChunk<O>> {
        (self.callback)(chunk)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
