//! End-to-end pipeline behaviour: data flow, warnings, failures, stop,
//! shutdown and the task manager's bookkeeping.

mod common;

use common::*;
use pipeline_core::chunk::DataChunk;
use pipeline_core::config::{EngineConfig, StageConfig};
use pipeline_core::error::{ErrorCategory, StageError, TaskError};
use pipeline_core::events::{Cause, EventDispatcher, EventFilter, TaskEventKind, TaskEventType};
use pipeline_core::execution::StageKind;
use pipeline_core::manager::TaskManager;
use pipeline_core::processor::{processor_fn, ProcessorChain};
use pipeline_core::reader::{IterReader, OnceReader};
use pipeline_core::state_machine::TaskState;
use pipeline_core::task::Task;
use pipeline_core::writer::{writer_fn, PartitionedWriter};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_records_flow_from_reader_to_writer() {
    pipeline_core::logging::init_structured_logging();

    let writer = CollectingWriter::new();
    let (records, _) = writer.handles();

    let task = Task::<u64, u64>::builder()
        .task_id("copy-five")
        .config(test_config())
        .reader(ChunkedReader::new(vec![vec![1, 2, 3], vec![4, 5]]))
        .passthrough()
        .writer(writer)
        .total(5)
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::for_task("copy-five"));

    task.start().unwrap();
    let seen = wait_for_event(&mut events, TaskEventType::Finished).await;
    task.join().await.unwrap();

    assert_eq!(seen[0].event_type(), TaskEventType::Started);
    assert_eq!(*records.lock(), vec![1, 2, 3, 4, 5]);

    let counters = task.context().counters().snapshot();
    assert_eq!(counters.read, 5);
    assert_eq!(counters.processed, 5);
    assert_eq!(counters.written, 5);
    assert_eq!(counters.dropped, 0);
    assert!(task.context().is_terminated());
    assert_eq!(task.report().progress(), Some(1.0));

    let rest = drain_events(&dispatcher, &mut events).await;
    assert_eq!(count_of(&rest, TaskEventType::Finished), 0, "Finished must be published once");
    assert_eq!(count_of(&rest, TaskEventType::Failed), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_reader_warns_until_stopped() {
    let reader = FailingReader::default();
    let attempts = Arc::clone(&reader.attempts);

    let task = Task::<u64, u64>::builder()
        .task_id("flaky-source")
        .config(test_config())
        .reader(reader)
        .passthrough()
        .writer(CollectingWriter::new())
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::for_task("flaky-source"));

    task.start().unwrap();
    for _ in 0..3 {
        let seen = wait_for_event(&mut events, TaskEventType::Warning).await;
        let warning = seen.last().unwrap();
        assert_eq!(warning.cause(), Some(Cause::ReaderFailed));
        assert_eq!(warning.error().unwrap().category(), ErrorCategory::Transient);
    }

    task.stop().unwrap();
    task.join().await.unwrap();
    assert!(attempts.load(Ordering::SeqCst) >= 3);

    assert_eq!(task.context().reader_state().get(), TaskState::Stopping);
    assert_eq!(task.context().writer_state().get(), TaskState::Stopping);

    let rest = drain_events(&dispatcher, &mut events).await;
    assert_eq!(count_of(&rest, TaskEventType::Failed), 0);
    assert_eq!(count_of(&rest, TaskEventType::Finished), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interrupting_processor_error_fails_the_pipeline() {
    let writer = CollectingWriter::new();
    let (records, _) = writer.handles();

    let task = Task::<u64, u64>::builder()
        .task_id("bad-batch")
        .config(test_config())
        .reader(IterReader::new(1..=5u64, 5))
        .processor(FlakyProcessor::new(2))
        .writer(writer)
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::for_task("bad-batch"));

    task.start().unwrap();
    let seen = wait_for_event(&mut events, TaskEventType::Failed).await;
    match &seen.last().unwrap().kind {
        TaskEventKind::Failed { cause, error } => {
            assert_eq!(*cause, Cause::ProcessorFailed);
            assert_eq!(error.category(), ErrorCategory::Permanent);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    task.join().await.unwrap();

    let ctx = task.context();
    assert_eq!(ctx.processor_state(0).unwrap().get(), TaskState::Failed);
    assert_eq!(ctx.writer_state().get(), TaskState::Failed);
    assert_eq!(ctx.reader_state().get(), TaskState::Terminated);
    assert!(ctx.has_failed());
    assert!(records.lock().len() <= 1);

    let rest = drain_events(&dispatcher, &mut events).await;
    assert_eq!(count_of(&rest, TaskEventType::Failed), 0, "only the processor publishes Failed");
    assert_eq!(count_of(&rest, TaskEventType::Finished), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_releases_reader_blocked_on_full_buffer() {
    let task = Task::<u64, u64>::builder()
        .task_id("backpressure")
        .config(EngineConfig::default())
        .reader(IterReader::new(0..100u64, 100))
        .processor(StallingProcessor)
        .writer(CollectingWriter::new())
        .read_buffer_size(1)
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::for_task("backpressure"));

    task.start().unwrap();
    let read_counter = Arc::clone(task.context());
    wait_until("the read buffer is full", || {
        task.read_buffer_len() == 1 && read_counter.counters().read_count() >= 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    task.shutdown().unwrap();
    let result = task.join().await;
    assert!(
        matches!(result, Err(TaskError::WorkerCancelled { .. })),
        "unexpected join result: {result:?}"
    );
    assert_eq!(task.context().reader_state().get(), TaskState::Terminated);
    assert!(task.context().is_terminated());

    let rest = drain_events(&dispatcher, &mut events).await;
    assert_eq!(count_of(&rest, TaskEventType::Started), 1);
    assert_eq!(count_of(&rest, TaskEventType::Shutdown), 1);
    assert_eq!(count_of(&rest, TaskEventType::Warning), 0);
    assert_eq!(count_of(&rest, TaskEventType::Failed), 0);
    assert_eq!(count_of(&rest, TaskEventType::Finished), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lifecycle_requests_on_a_new_task_are_rejected() {
    let task = Task::<u64, u64>::builder()
        .config(test_config())
        .reader(PendingReader)
        .passthrough()
        .writer(CollectingWriter::new())
        .build()
        .unwrap();

    assert!(matches!(task.stop(), Err(TaskError::StateTransition(_))));
    assert!(matches!(task.shutdown(), Err(TaskError::StateTransition(_))));
    assert_eq!(task.context().reader_state().get(), TaskState::New);

    task.start().unwrap();
    assert!(task.start().is_err());
    task.shutdown().unwrap();
    assert!(task.shutdown().is_err());
    let _ = task.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_waits_for_stopped_workers() {
    let task = Task::<u64, u64>::builder()
        .task_id("restartable")
        .config(test_config())
        .reader(SlowReader::new(Duration::from_millis(100)))
        .passthrough()
        .writer(CollectingWriter::new())
        .build()
        .unwrap();

    task.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    task.stop().unwrap();

    // the reader is still inside its slow read
    assert!(matches!(task.start(), Err(TaskError::WorkerBusy { .. })));

    task.join().await.unwrap();
    assert_eq!(task.executor().live_workers(), 0);
    assert_eq!(task.context().reader_state().get(), TaskState::Stopping);

    task.start().unwrap();
    assert_eq!(task.context().reader_state().get(), TaskState::Running);
    wait_until("a record is written after restart", || {
        task.context().counters().written_count() >= 2
    })
    .await;

    task.shutdown().unwrap();
    let _ = task.join().await;
    assert_eq!(task.context().writer_state().get(), TaskState::Terminated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_processor_chain_transforms_records_in_order() {
    let writer = CollectingWriter::new();
    let (records, _) = writer.handles();

    let chain = ProcessorChain::new(processor_fn("parse", |rows: DataChunk<String>| {
        rows.into_iter()
            .map(|row| row.parse::<u64>().map_err(|e| StageError::invalid_data(e.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(DataChunk::new)
    }))
    .then_with_capacity(
        processor_fn("double", |values: DataChunk<u64>| {
            Ok(values.into_iter().map(|v| v * 2).collect())
        }),
        4,
    )
    .then(processor_fn("label", |values: DataChunk<u64>| {
        Ok(values.into_iter().map(|v| format!("#{v}")).collect())
    }));

    let task = Task::<String, String>::builder()
        .task_id("chain")
        .config(test_config())
        .reader(IterReader::new((1..=20).map(|n| n.to_string()), 3))
        .processor_chain(chain)
        .writer(writer)
        .build()
        .unwrap();
    assert_eq!(task.processor_names(), vec!["parse", "double", "label"]);

    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::for_task("chain"));
    task.start().unwrap();
    wait_for_event(&mut events, TaskEventType::Finished).await;
    task.join().await.unwrap();

    let expected: Vec<String> = (1..=20).map(|n| format!("#{}", n * 2)).collect();
    assert_eq!(*records.lock(), expected);
    let counters = task.context().counters().snapshot();
    assert_eq!(counters.read, 20);
    assert_eq!(counters.processed, 20);
    assert_eq!(counters.written, 20);
    assert_eq!(task.context().stage_states().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partitioned_writer_bounds_write_size() {
    let writer = CollectingWriter::new();
    let (records, batch_sizes) = writer.handles();

    let task = Task::<u64, u64>::builder()
        .config(test_config())
        .reader(OnceReader::new(IterReader::new(0..11u64, 11)))
        .passthrough()
        .writer(PartitionedWriter::new(writer, 2))
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::all());

    task.start().unwrap();
    wait_for_event(&mut events, TaskEventType::Finished).await;
    task.join().await.unwrap();

    assert_eq!(records.lock().len(), 11);
    assert!(batch_sizes.lock().iter().all(|size| *size <= 2));
    assert_eq!(task.context().counters().written_count(), 11);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_processors_read_task_parameters() {
    let writer = CollectingWriter::new();
    let (records, _) = writer.handles();

    struct Scale;

    #[async_trait::async_trait]
    impl pipeline_core::processor::Processor<u64, u64> for Scale {
        async fn process(
            &self,
            ctx: &pipeline_core::context::TaskContext,
            chunk: DataChunk<u64>,
        ) -> pipeline_core::error::StageResult<DataChunk<u64>> {
            let factor: u64 = ctx
                .parameters()
                .get("factor")
                .map_err(|e| StageError::new(ErrorCategory::Configuration, e.to_string()))?
                .unwrap_or(1);
            Ok(chunk.into_iter().map(|v| v * factor).collect())
        }
    }

    let task = Task::<u64, u64>::builder()
        .config(test_config())
        .parameter("factor", 10u64)
        .parameter("source", "users")
        .reader(ChunkedReader::new(vec![vec![1, 2, 3]]))
        .processor(Scale)
        .writer(writer)
        .build()
        .unwrap();
    assert_eq!(task.context().parameters().get_str("source").as_deref(), Some("users"));

    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::all());
    task.start().unwrap();
    wait_for_event(&mut events, TaskEventType::Finished).await;
    task.join().await.unwrap();

    assert_eq!(*records.lock(), vec![10, 20, 30]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writer_errors_outside_interrupt_set_only_warn() {
    let task = Task::<u64, u64>::builder()
        .config(test_config())
        .reader(ChunkedReader::new(vec![vec![1, 2], vec![3]]))
        .passthrough()
        .writer(writer_fn(|_chunk: DataChunk<u64>| {
            Err(StageError::new(ErrorCategory::Network, "sink unreachable"))
        }))
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::all());

    task.start().unwrap();
    let seen = wait_for_event(&mut events, TaskEventType::Finished).await;
    task.join().await.unwrap();

    assert!(seen
        .iter()
        .filter(|event| event.event_type() == TaskEventType::Warning)
        .all(|event| event.cause() == Some(Cause::WriterFailed)));
    assert!(count_of(&seen, TaskEventType::Warning) >= 1);
    assert_eq!(task.context().counters().written_count(), 0);
    assert!(task.context().is_terminated());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interrupting_writer_error_fails_the_pipeline() {
    let mut config = test_config();
    config.writer = StageConfig::default().with_interrupt_for([ErrorCategory::Permanent]);

    let task = Task::<u64, u64>::builder()
        .task_id("sink-gone")
        .config(config)
        .reader(ChunkedReader::new(vec![vec![1, 2], vec![3]]))
        .passthrough()
        .writer(writer_fn(|_chunk: DataChunk<u64>| {
            Err(StageError::permanent("target table dropped"))
        }))
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::for_task("sink-gone"));

    task.start().unwrap();
    let seen = wait_for_event(&mut events, TaskEventType::Failed).await;
    assert_eq!(seen.last().unwrap().cause(), Some(Cause::WriterFailed));
    task.join().await.unwrap();

    let ctx = task.context();
    assert_eq!(ctx.writer_state().get(), TaskState::Failed);
    assert_eq!(ctx.counters().written_count(), 0);
    assert!(!ctx.is_terminated());

    let rest = drain_events(&dispatcher, &mut events).await;
    assert_eq!(count_of(&seen, TaskEventType::Finished), 0);
    assert_eq!(count_of(&rest, TaskEventType::Finished), 0);
    assert_eq!(count_of(&rest, TaskEventType::Failed), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interrupting_reader_error_fails_every_stage() {
    let mut config = test_config();
    config.reader = StageConfig::default().with_interrupt_for([ErrorCategory::Permanent]);

    let task = Task::<u64, u64>::builder()
        .task_id("bad-source")
        .config(config)
        .reader(BrokenReader)
        .passthrough()
        .writer(CollectingWriter::new())
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::for_task("bad-source"));

    task.start().unwrap();
    let seen = wait_for_event(&mut events, TaskEventType::Failed).await;
    match &seen.last().unwrap().kind {
        TaskEventKind::Failed { cause, error } => {
            assert_eq!(*cause, Cause::ReaderFailed);
            assert_eq!(error.category(), ErrorCategory::Permanent);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    task.join().await.unwrap();

    assert_eq!(
        task.context().stage_states(),
        vec![
            (StageKind::Reader, TaskState::Failed),
            (StageKind::Processor(0), TaskState::Failed),
            (StageKind::Writer, TaskState::Failed),
        ]
    );
    assert_eq!(task.context().counters().read_count(), 0);

    let rest = drain_events(&dispatcher, &mut events).await;
    assert_eq!(count_of(&rest, TaskEventType::Failed), 0, "only the reader publishes Failed");
    assert_eq!(count_of(&rest, TaskEventType::Finished), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_processor_batches_count_as_dropped() {
    let writer = CollectingWriter::new();
    let (records, _) = writer.handles();

    let task = Task::<u64, u64>::builder()
        .task_id("hiccup")
        .config(test_config())
        .reader(ChunkedReader::new(vec![vec![1, 2, 3], vec![4, 5]]))
        .processor(HiccupProcessor::default())
        .writer(writer)
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::for_task("hiccup"));

    task.start().unwrap();
    let seen = wait_for_event(&mut events, TaskEventType::Finished).await;
    task.join().await.unwrap();

    assert!(seen
        .iter()
        .any(|event| event.cause() == Some(Cause::ProcessorFailed)));

    let counters = task.context().counters().snapshot();
    assert_eq!(counters.read, 5);
    assert!(counters.dropped >= 1);
    assert_eq!(counters.read, counters.processed + counters.dropped);
    assert_eq!(counters.in_flight(), 0);
    assert_eq!(counters.written, counters.processed);
    assert_eq!(counters.read_dropped, 0);
    assert_eq!(records.lock().len() as u64, counters.written);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reader_drops_records_when_read_buffer_stays_full() {
    let mut config = test_config();
    config.reader = StageConfig::default().with_produce_retry(2, Duration::from_millis(5));

    let task = Task::<u64, u64>::builder()
        .task_id("read-overflow")
        .config(config)
        .reader(IterReader::new(0..10u64, 10))
        .processor(StallingProcessor)
        .writer(CollectingWriter::new())
        .read_buffer_size(1)
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(
        &dispatcher,
        EventFilter::for_task("read-overflow").with_types([TaskEventType::Warning]),
    );

    task.start().unwrap();
    let seen = wait_for_event(&mut events, TaskEventType::Warning).await;
    assert_eq!(seen.last().unwrap().cause(), Some(Cause::ReaderToBufferFailed));

    let ctx = Arc::clone(task.context());
    wait_until("the reader has drained its source", || {
        let counters = ctx.counters().snapshot();
        counters.read + counters.read_dropped == 10
    })
    .await;

    let counters = ctx.counters().snapshot();
    assert!(counters.read_dropped >= 1);
    assert_eq!(counters.dropped, 0, "reader-side losses are not processor drops");
    assert_eq!(ctx.reader_state().get(), TaskState::Terminated);

    task.shutdown().unwrap();
    let result = task.join().await;
    assert!(
        matches!(result, Err(TaskError::WorkerCancelled { .. })),
        "unexpected join result: {result:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_processor_is_reported() {
    let task = Task::<u64, u64>::builder()
        .config(test_config())
        .reader(ChunkedReader::new(vec![vec![1]]))
        .processor(PanickingProcessor)
        .writer(CollectingWriter::new())
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::all());

    task.start().unwrap();
    let seen = wait_for_event(&mut events, TaskEventType::Failed).await;
    assert_eq!(seen.last().unwrap().cause(), Some(Cause::ProcessorFailed));

    let result = task.join().await;
    match result {
        Err(TaskError::WorkerPanicked { stage, message }) => {
            assert_eq!(stage, "processor[0]");
            assert!(message.contains("processor blew up"));
        }
        other => panic!("expected WorkerPanicked, got {other:?}"),
    }
    assert_eq!(task.context().writer_state().get(), TaskState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_write_buffer_drops_records_with_warnings() {
    let mut config = test_config();
    config.processor = StageConfig::default().with_produce_retry(2, Duration::from_millis(5));

    let task = Task::<u64, u64>::builder()
        .config(config)
        .reader(ChunkedReader::new(vec![(0..8).collect()]))
        .passthrough()
        .writer(writer_fn(|chunk: DataChunk<u64>| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(chunk.len())
        }))
        .write_buffer_size(1)
        .build()
        .unwrap();
    let dispatcher = Arc::clone(task.context().dispatcher());
    let mut events = record_events(&dispatcher, EventFilter::all());

    task.start().unwrap();
    let seen = wait_for_event(&mut events, TaskEventType::Finished).await;
    task.join().await.unwrap();

    let counters = task.context().counters().snapshot();
    assert!(counters.dropped >= 1);
    assert_eq!(counters.processed + counters.dropped, 8);
    assert_eq!(counters.written, counters.processed);
    assert!(seen
        .iter()
        .any(|event| event.cause() == Some(Cause::ProcessorToBufferFailed)));
}

#[test]
fn test_build_requires_runtime_and_stages() {
    let missing_runtime = Task::<u64, u64>::builder()
        .reader(PendingReader)
        .passthrough()
        .writer(CollectingWriter::new())
        .build();
    assert!(matches!(missing_runtime, Err(TaskError::RuntimeUnavailable(_))));

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let missing_reader = Task::<u64, u64>::builder()
        .executor(runtime.handle().clone())
        .passthrough()
        .writer(CollectingWriter::new())
        .build();
    assert!(matches!(missing_reader, Err(TaskError::BuildError(_))));

    let zero_buffer = Task::<u64, u64>::builder()
        .executor(runtime.handle().clone())
        .reader(PendingReader)
        .passthrough()
        .writer(CollectingWriter::new())
        .read_buffer_size(0)
        .build();
    assert!(matches!(zero_buffer, Err(TaskError::BuildError(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manager_tracks_running_tasks() {
    let manager = TaskManager::new(test_config()).unwrap();
    let task = manager
        .task_builder::<u64, u64>()
        .task_id("managed")
        .reader(PendingReader)
        .passthrough()
        .writer(CollectingWriter::new())
        .build()
        .unwrap();
    assert!(task.manager().is_some());
    let mut events = record_events(manager.dispatcher(), EventFilter::for_task("managed"));
    assert_eq!(manager.dispatcher().subscription_count(), 2);

    task.start().unwrap();
    wait_for_event(&mut events, TaskEventType::Started).await;
    assert_eq!(manager.task_count(), 1);
    assert!(manager.get("managed").is_some());

    task.shutdown().unwrap();
    wait_for_event(&mut events, TaskEventType::Shutdown).await;
    assert!(manager.get("managed").is_none());
    // the task-scoped subscription is cleared with the task
    assert_eq!(manager.dispatcher().subscription_count(), 1);

    let _ = task.join().await;
    assert_eq!(manager.shutdown(), 0);
    assert!(manager.dispatcher().is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manager_unregisters_failed_tasks() {
    let manager = TaskManager::new(test_config()).unwrap();
    let task = manager
        .task_builder::<u64, u64>()
        .task_id("doomed")
        .reader(IterReader::new(1..=5u64, 5))
        .processor(FlakyProcessor::new(1))
        .writer(CollectingWriter::new())
        .build()
        .unwrap();
    let mut events = record_events(manager.dispatcher(), EventFilter::for_task("doomed"));

    task.start().unwrap();
    wait_for_event(&mut events, TaskEventType::Failed).await;
    assert_eq!(manager.task_count(), 0);

    // the reader is still draining its source; callers shut failed tasks down
    let _ = task.shutdown();
    let _ = task.join().await;
    manager.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_managed_task_rejects_foreign_dispatcher() {
    let manager = TaskManager::new(test_config()).unwrap();
    let foreign = EventDispatcher::try_current(&test_config().dispatcher).unwrap();

    let result = manager
        .task_builder::<u64, u64>()
        .reader(PendingReader)
        .passthrough()
        .writer(CollectingWriter::new())
        .dispatcher(foreign)
        .build();
    assert!(matches!(result, Err(TaskError::BuildError(_))));
    manager.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manager_reports_running_tasks() {
    let manager = TaskManager::new(test_config()).unwrap();
    let reporter = Arc::new(CollectingReporter::default());

    let task = manager
        .task_builder::<u64, u64>()
        .task_id("reported")
        .reader(SlowReader::new(Duration::from_millis(5)))
        .passthrough()
        .writer(CollectingWriter::new())
        .add_reporter(Arc::clone(&reporter) as Arc<dyn pipeline_core::manager::TaskReporter>)
        .report_period(Duration::from_millis(20))
        .build()
        .unwrap();

    task.start().unwrap();
    wait_until("two reports arrive", || reporter.reports.lock().len() >= 2).await;

    let reports = reporter.reports.lock().clone();
    assert!(reports.iter().all(|report| report.task_id == "reported"));
    assert!(reports.iter().all(|report| report.total.is_none() && report.progress().is_none()));
    assert_eq!(reports[0].states.len(), 3);

    assert_eq!(manager.shutdown(), 1);
    let _ = task.join().await;
    assert_eq!(task.context().reader_state().get(), TaskState::Terminated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expired_tasks_are_shut_down() {
    let manager = TaskManager::new(test_config()).unwrap();
    let task = manager
        .task_builder::<u64, u64>()
        .task_id("expiring")
        .reader(PendingReader)
        .passthrough()
        .writer(CollectingWriter::new())
        .timeout(Duration::from_millis(30))
        .build()
        .unwrap();
    let mut events = record_events(manager.dispatcher(), EventFilter::for_task("expiring"));

    task.start().unwrap();
    wait_for_event(&mut events, TaskEventType::Shutdown).await;
    assert!(manager.get("expiring").is_none());
    assert_eq!(manager.registry().stats().expired, 1);

    let result = task.join().await;
    assert!(matches!(result, Err(TaskError::WorkerCancelled { .. })));
    manager.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_evicts_oldest_without_stopping_it() {
    let mut config = test_config();
    config.registry.maximum_size = Some(1);
    let manager = TaskManager::new(config).unwrap();

    let build = |id: &str| {
        manager
            .task_builder::<u64, u64>()
            .task_id(id)
            .reader(PendingReader)
            .passthrough()
            .writer(CollectingWriter::new())
            .build()
            .unwrap()
    };
    let first = build("first");
    let second = build("second");
    let mut events = record_events(manager.dispatcher(), EventFilter::all().with_types([TaskEventType::Started]));

    first.start().unwrap();
    wait_for_event(&mut events, TaskEventType::Started).await;
    second.start().unwrap();
    wait_for_event(&mut events, TaskEventType::Started).await;

    assert_eq!(manager.registry().task_ids(), vec!["second".to_string()]);
    assert_eq!(manager.registry().stats().evicted, 1);
    assert_eq!(first.context().reader_state().get(), TaskState::Running);

    assert_eq!(manager.shutdown(), 1);
    first.shutdown().unwrap();
    let _ = first.join().await;
    let _ = second.join().await;
}
