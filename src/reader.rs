//! Source side of a pipeline.

use crate::chunk::DataChunk;
use crate::config::StageConfig;
use crate::context::TaskContext;
use crate::error::StageResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::iter::Peekable;
use std::sync::atomic::{AtomicBool, Ordering};

/// Pulls chunks of records from an external source.
///
/// Returning an empty chunk tells the reader stage the source is exhausted.
#[async_trait]
pub trait Reader<I: Send + 'static>: Send + Sync + 'static {
    async fn read(&self, ctx: &TaskContext) -> StageResult<DataChunk<I>>;

    /// Awaited once before the first `read` of every run.
    async fn initialize(&self, _ctx: &TaskContext) -> StageResult<()> {
        Ok(())
    }

    /// Awaited once the reader stage reaches a terminal state.
    async fn destroy(&self, _ctx: &TaskContext) -> StageResult<()> {
        Ok(())
    }

    /// Stage policy override; `None` uses the engine's `reader` section.
    fn config(&self) -> Option<StageConfig> {
        None
    }
}

/// Delegates to the inner reader until it returns one chunk, then reports exhaustion.
///
/// A failed read does not count as the one read.
pub struct OnceReader<R> {
    inner: R,
    done: AtomicBool,
}

impl<R> OnceReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            done: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<I, R> Reader<I> for OnceReader<R>
where
    I: Send + 'static,
    R: Reader<I>,
{
    async fn read(&self, ctx: &TaskContext) -> StageResult<DataChunk<I>> {
        if self.done.load(Ordering::Acquire) {
            return Ok(DataChunk::empty());
        }
        let chunk = self.inner.read(ctx).await?;
        self.done.store(true, Ordering::Release);
        Ok(chunk)
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

/// Drains an in-memory iterator in chunks of `chunk_size` records.
pub struct IterReader<It: Iterator> {
    records: Mutex<Peekable<It>>,
    chunk_size: usize,
}

impl<It: Iterator> IterReader<It> {
    pub fn new(records: impl IntoIterator<IntoIter = It>, chunk_size: usize) -> Self {
        Self {
            records: Mutex::new(records.into_iter().peekable()),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn has_more(&self) -> bool {
        self.records.lock().peek().is_some()
    }

    /// Next chunk, empty once the iterator is drained.
    pub fn read_more(&self) -> DataChunk<It::Item> {
        self.records.lock().by_ref().take(self.chunk_size).collect()
    }
}

#[async_trait]
impl<It> Reader<It::Item> for IterReader<It>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
{
    async fn read(&self, _ctx: &TaskContext) -> StageResult<DataChunk<It::Item>> {
        Ok(self.read_more())
    }
}
