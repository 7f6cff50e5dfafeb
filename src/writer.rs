//! Sink side of a pipeline.

use crate::chunk::DataChunk;
use crate::config::StageConfig;
use crate::context::TaskContext;
use crate::error::StageResult;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Flushes chunks to an external sink, reporting how many records were written.
#[async_trait]
pub trait Writer<O: Send + 'static>: Send + Sync + 'static {
    async fn write(&self, ctx: &TaskContext, chunk: DataChunk<O>) -> StageResult<usize>;

    async fn initialize(&self, _ctx: &TaskContext) -> StageResult<()> {
        Ok(())
    }

    async fn destroy(&self, _ctx: &TaskContext) -> StageResult<()> {
        Ok(())
    }

    /// Stage policy override; `None` uses the engine's `writer` section.
    fn config(&self) -> Option<StageConfig> {
        None
    }
}

/// Splits every chunk into sub-batches of at most `partition_size` records
/// for sinks that only accept bounded writes.
///
/// The first failing partition aborts the remaining ones and its error is
/// returned for the whole chunk. Records from partitions that were already
/// flushed are added to the task's written counter before the error returns.
pub struct PartitionedWriter<W> {
    inner: W,
    partition_size: usize,
}

impl<W> PartitionedWriter<W> {
    pub fn new(inner: W, partition_size: usize) -> Self {
        Self {
            inner,
            partition_size: partition_size.max(1),
        }
    }

    pub fn partition_size(&self) -> usize {
        self.partition_size
    }
}

#[async_trait]
impl<O, W> Writer<O> for PartitionedWriter<W>
where
    O: Send + 'static,
    W: Writer<O>,
{
    async fn write(&self, ctx: &TaskContext, chunk: DataChunk<O>) -> StageResult<usize> {
        let mut written = 0;
        for partition in chunk.partition(self.partition_size) {
            match self.inner.write(ctx, partition).await {
                Ok(count) => written += count,
                Err(error) => {
                    ctx.counters().incr_written(written as u64);
                    return Err(error);
                }
            }
        }
        Ok(written)
    }

    async fn initialize(&self, ctx: &TaskContext) -> StageResult<()> {
        self.inner.initialize(ctx).await
    }

    async fn destroy(&self, ctx: &TaskContext) -> StageResult<()> {
        self.inner.destroy(ctx).await
    }

    fn config(&self) -> Option<StageConfig> {
        self.inner.config()
    }
}

/// Writer backed by a synchronous closure.
pub struct FnWriter<O, F> {
    callback: F,
    _records: PhantomData<fn(O)>,
}

pub fn writer_fn<O, F>(callback: F) -> FnWriter<O, F>
where
    F: Fn(DataChunk<O>) -> StageResult<usize> + Send + Sync + 'static,
{
    FnWriter {
        callback,
        _records: PhantomData,
    }
}

#[async_trait]
impl<O, F> Writer<O> for FnWriter<O, F>
where
    O: Send + 'static,
    F: Fn(DataChunk<O>) -> StageResult<usize> + Send + Sync + 'static,
{
    async fn write(&self, _ctx: &TaskContext, chunk: DataChunk<O>) -> StageResult<usize> {
        (self.callback)(chunk)
    }
}
