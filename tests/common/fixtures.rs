//! Readers, processors, writers and subscribers shared by the integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::chunk::DataChunk;
use pipeline_core::config::{EngineConfig, StageConfig};
use pipeline_core::context::TaskContext;
use pipeline_core::error::{ErrorCategory, StageError, StageResult};
use pipeline_core::events::{EventDispatcher, EventFilter, EventSubscriber, TaskEvent, TaskEventType};
use pipeline_core::manager::{TaskReport, TaskReporter};
use pipeline_core::processor::Processor;
use pipeline_core::reader::Reader;
use pipeline_core::writer::Writer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine config with short retry waits so saturation tests finish quickly.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.execution.idle_poll_ms = 1;
    config.reporter.tick_ms = 10;
    config
}

/// Returns the queued chunks in order, then empty chunks.
pub struct ChunkedReader<T> {
    chunks: Mutex<VecDeque<Vec<T>>>,
}

impl<T> ChunkedReader<T> {
    pub fn new(chunks: Vec<Vec<T>>) -> Self {
        Self {
            chunks: Mutex::new(chunks.into()),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Reader<T> for ChunkedReader<T> {
    async fn read(&self, _ctx: &TaskContext) -> StageResult<DataChunk<T>> {
        Ok(self.chunks.lock().pop_front().map(DataChunk::new).unwrap_or_default())
    }
}

/// Fails every read with a transient error.
#[derive(Default)]
pub struct FailingReader {
    pub attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Reader<u64> for FailingReader {
    async fn read(&self, _ctx: &TaskContext) -> StageResult<DataChunk<u64>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        Err(StageError::transient(format!("source unavailable (attempt {attempt})")))
    }
}

/// Fails every read with a permanent error.
pub struct BrokenReader;

#[async_trait]
impl Reader<u64> for BrokenReader {
    async fn read(&self, _ctx: &TaskContext) -> StageResult<DataChunk<u64>> {
        Err(StageError::permanent("source schema is incompatible"))
    }
}

/// Yields one record per read after a short sleep, forever.
pub struct SlowReader {
    pub delay: Duration,
    next: AtomicUsize,
}

impl SlowReader {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Reader<u64> for SlowReader {
    async fn read(&self, _ctx: &TaskContext) -> StageResult<DataChunk<u64>> {
        tokio::time::sleep(self.delay).await;
        let next = self.next.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(DataChunk::of([next]))
    }
}

/// Never returns from `read`.
pub struct PendingReader;

#[async_trait]
impl Reader<u64> for PendingReader {
    async fn read(&self, _ctx: &TaskContext) -> StageResult<DataChunk<u64>> {
        std::future::pending().await
    }
}

/// Passes batches through until call number `fail_on`, which fails permanently.
pub struct FlakyProcessor {
    fail_on: usize,
    calls: AtomicUsize,
}

impl FlakyProcessor {
    pub fn new(fail_on: usize) -> Self {
        Self {
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Processor<u64, u64> for FlakyProcessor {
    async fn process(&self, _ctx: &TaskContext, chunk: DataChunk<u64>) -> StageResult<DataChunk<u64>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StageError::permanent(format!("corrupt batch #{call}")));
        }
        Ok(chunk)
    }

    fn config(&self) -> Option<StageConfig> {
        Some(
            StageConfig::default()
                .with_max_consume_count(1)
                .with_interrupt_for([ErrorCategory::Permanent]),
        )
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Rejects its first batch with a transient error, then passes batches through.
#[derive(Default)]
pub struct HiccupProcessor {
    calls: AtomicUsize,
}

#[async_trait]
impl Processor<u64, u64> for HiccupProcessor {
    async fn process(&self, _ctx: &TaskContext, chunk: DataChunk<u64>) -> StageResult<DataChunk<u64>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StageError::transient("lookup service timed out"));
        }
        Ok(chunk)
    }
}

/// Holds every batch for a minute.
pub struct StallingProcessor;

#[async_trait]
impl Processor<u64, u64> for StallingProcessor {
    async fn process(&self, _ctx: &TaskContext, chunk: DataChunk<u64>) -> StageResult<DataChunk<u64>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(chunk)
    }
}

/// Panics on the first batch.
pub struct PanickingProcessor;

#[async_trait]
impl Processor<u64, u64> for PanickingProcessor {
    async fn process(&self, _ctx: &TaskContext, _chunk: DataChunk<u64>) -> StageResult<DataChunk<u64>> {
        panic!("processor blew up");
    }
}

/// Keeps every written record and the size of every write call.
pub struct CollectingWriter<T> {
    pub records: Arc<Mutex<Vec<T>>>,
    pub batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl<T> CollectingWriter<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            batch_sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handles to inspect what was written once the writer is moved into a task.
    pub fn handles(&self) -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<usize>>>) {
        (Arc::clone(&self.records), Arc::clone(&self.batch_sizes))
    }
}

#[async_trait]
impl<T: Send + 'static> Writer<T> for CollectingWriter<T> {
    async fn write(&self, _ctx: &TaskContext, chunk: DataChunk<T>) -> StageResult<usize> {
        let len = chunk.len();
        self.batch_sizes.lock().push(len);
        self.records.lock().extend(chunk);
        Ok(len)
    }
}

/// Forwards every delivered event to a channel.
pub struct RecordingSubscriber {
    sender: mpsc::UnboundedSender<TaskEvent>,
}

#[async_trait]
impl EventSubscriber for RecordingSubscriber {
    async fn on_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
        self.sender.send(event.clone())?;
        Ok(())
    }

    fn subscriber_name(&self) -> &str {
        "recording_subscriber"
    }
}

pub fn record_events(
    dispatcher: &EventDispatcher,
    filter: EventFilter,
) -> mpsc::UnboundedReceiver<TaskEvent> {
    let (sender, receiver) = mpsc::unbounded_channel();
    dispatcher.subscribe(filter, Arc::new(RecordingSubscriber { sender }));
    receiver
}

/// Collect events until one of `event_type` arrives. Panics after [`EVENT_TIMEOUT`].
pub async fn wait_for_event(
    receiver: &mut mpsc::UnboundedReceiver<TaskEvent>,
    event_type: TaskEventType,
) -> Vec<TaskEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, receiver.recv()).await {
            Ok(Some(event)) => {
                let matched = event.event_type() == event_type;
                seen.push(event);
                if matched {
                    return seen;
                }
            }
            Ok(None) => panic!("event stream closed before {event_type}: {seen:?}"),
            Err(_) => panic!("timed out waiting for {event_type}: {seen:?}"),
        }
    }
}

/// Close `dispatcher`, wait for delivery to finish and return what is left in `receiver`.
pub async fn drain_events(
    dispatcher: &EventDispatcher,
    receiver: &mut mpsc::UnboundedReceiver<TaskEvent>,
) -> Vec<TaskEvent> {
    dispatcher.shutdown();
    dispatcher.closed().await;
    let mut rest = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        rest.push(event);
    }
    rest
}

pub fn count_of(events: &[TaskEvent], event_type: TaskEventType) -> usize {
    events.iter().filter(|event| event.event_type() == event_type).count()
}

/// Poll `condition` every millisecond until it holds. Panics after [`EVENT_TIMEOUT`].
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting until {what}");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Keeps every report it receives.
#[derive(Default)]
pub struct CollectingReporter {
    pub reports: Mutex<Vec<TaskReport>>,
}

#[async_trait]
impl TaskReporter for CollectingReporter {
    async fn report(&self, report: &TaskReport) -> anyhow::Result<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }

    fn reporter_name(&self) -> &str {
        "collecting_reporter"
    }
}
