//! # Task
//!
//! The façade binding a reader, a processor chain and a writer to their
//! context and executor. Lifecycle calls delegate to the executor and then
//! publish the matching event.

pub mod builder;

pub use builder::TaskBuilder;

use crate::buffer::DataBuffer;
use crate::config::{EngineConfig, StageConfig};
use crate::context::TaskContext;
use crate::error::{TaskError, TaskResult};
use crate::events::{TaskEvent, TaskEventKind};
use crate::execution::processor_executor::NodeLauncher;
use crate::execution::reader_executor::run_reader;
use crate::execution::writer_executor::run_writer;
use crate::execution::{StageEnv, StageExit, StageKind, TaskExecutor};
use crate::logging::log_task_operation;
use crate::manager::{TaskManager, TaskReport, TaskReporter};
use crate::reader::Reader;
use crate::writer::Writer;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Object-safe view of a task, used by events, the registry and the manager.
pub trait ManagedTask: Send + Sync {
    fn task_id(&self) -> &str;

    fn context(&self) -> &Arc<TaskContext>;

    fn shutdown(&self) -> TaskResult<()>;

    /// Reporters of this task; empty means the manager's defaults.
    fn reporters(&self) -> &[Arc<dyn TaskReporter>];

    /// Reporting period; `None` means the manager's default.
    fn report_period(&self) -> Option<Duration>;

    /// Registry timeout; `None` means the registry default.
    fn timeout(&self) -> Option<Duration>;

    fn report(&self) -> TaskReport {
        TaskReport::from_context(self.context())
    }
}

/// Resolved stage policies for one task.
#[derive(Debug, Clone)]
pub(crate) struct StagePolicies {
    pub reader: StageConfig,
    pub processors: Vec<StageConfig>,
    pub writer: StageConfig,
}

pub struct Task<I: Send + 'static, O: Send + 'static> {
    context: Arc<TaskContext>,
    reader: Arc<dyn Reader<I>>,
    read_buffer: Arc<DataBuffer<I>>,
    nodes: Vec<Box<dyn NodeLauncher>>,
    writer: Arc<dyn Writer<O>>,
    write_buffer: Arc<DataBuffer<O>>,
    executor: TaskExecutor,
    policies: StagePolicies,
    engine: EngineConfig,
    reporters: Vec<Arc<dyn TaskReporter>>,
    report_period: Option<Duration>,
    timeout: Option<Duration>,
    manager: Option<Weak<TaskManager>>,
    me: Weak<Task<I, O>>,
}

impl<I: Send + 'static, O: Send + 'static> Task<I, O> {
    pub fn builder() -> TaskBuilder<I, O> {
        TaskBuilder::new()
    }

    pub fn task_id(&self) -> &str {
        self.context.task_id()
    }

    pub fn context(&self) -> &Arc<TaskContext> {
        &self.context
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn manager(&self) -> Option<Arc<TaskManager>> {
        self.manager.as_ref().and_then(Weak::upgrade)
    }

    pub fn processor_names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|node| node.name()).collect()
    }

    pub fn read_buffer_len(&self) -> usize {
        self.read_buffer.len()
    }

    pub fn write_buffer_len(&self) -> usize {
        self.write_buffer.len()
    }

    fn as_managed(&self) -> TaskResult<Arc<dyn ManagedTask>> {
        let task: Arc<dyn ManagedTask> = self
            .me
            .upgrade()
            .ok_or_else(|| TaskError::BuildError("task is being dropped".to_string()))?;
        Ok(task)
    }

    fn publish(&self, task: Arc<dyn ManagedTask>, kind: TaskEventKind) {
        self.context.dispatcher().dispatch(TaskEvent::new(kind, task));
    }

    /// Launch one worker per stage and publish `Started`.
    pub fn start(&self) -> TaskResult<()> {
        let task = self.as_managed()?;
        let env = StageEnv::new(
            Arc::clone(&task),
            self.executor.control(),
            self.engine.execution.idle_poll(),
        );

        self.executor.start(
            &self.context,
            || self.publish(Arc::clone(&task), TaskEventKind::Started),
            || self.workers(&env),
        )?;
        log_task_operation("start", self.task_id(), "running", None);
        Ok(())
    }

    fn workers(&self, env: &StageEnv) -> Vec<(StageKind, BoxFuture<'static, StageExit>)> {
        let mut workers = Vec::with_capacity(self.nodes.len() + 2);
        workers.push((
            StageKind::Reader,
            run_reader(
                env.clone(),
                Arc::clone(&self.reader),
                Arc::clone(&self.read_buffer),
                self.policies.reader.clone(),
            )
            .boxed(),
        ));
        let last = self.nodes.len().saturating_sub(1);
        for (index, (node, config)) in self.nodes.iter().zip(&self.policies.processors).enumerate() {
            workers.push((
                StageKind::Processor(index),
                node.launch(env.clone(), index, index == last, config.clone()),
            ));
        }
        workers.push((
            StageKind::Writer,
            run_writer(
                env.clone(),
                Arc::clone(&self.writer),
                Arc::clone(&self.write_buffer),
                self.policies.writer.clone(),
            )
            .boxed(),
        ));
        workers
    }

    /// Ask running stages to drain and stop, then publish `Stopped`.
    pub fn stop(&self) -> TaskResult<()> {
        let task = self.as_managed()?;
        self.executor.stop(&self.context)?;
        log_task_operation("stop", self.task_id(), "stopping", None);
        self.publish(task, TaskEventKind::Stopped);
        Ok(())
    }

    /// Terminate every live stage, cancel its worker and publish `Shutdown`.
    pub fn shutdown(&self) -> TaskResult<()> {
        let task = self.as_managed()?;
        self.executor.shutdown(&self.context)?;
        log_task_operation("shutdown", self.task_id(), "terminated", None);
        self.publish(task, TaskEventKind::Shutdown);
        Ok(())
    }

    /// Wait until every stage worker of the latest start has exited.
    pub async fn join(&self) -> TaskResult<()> {
        self.executor.join().await
    }

    pub fn report(&self) -> TaskReport {
        TaskReport::from_context(&self.context)
    }
}

impl<I: Send + 'static, O: Send + 'static> ManagedTask for Task<I, O> {
    fn task_id(&self) -> &str {
        self.context.task_id()
    }

    fn context(&self) -> &Arc<TaskContext> {
        &self.context
    }

    fn shutdown(&self) -> TaskResult<()> {
        Task::shutdown(self)
    }

    fn reporters(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }

    fn report_period(&self) -> Option<Duration> {
        self.report_period
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl<I: Send + 'static, O: Send + 'static> fmt::Debug for Task<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("task_id", &self.task_id())
            .field("processors", &self.processor_names())
            .field("states", &self.context.stage_states())
            .field("executor", &self.executor)
            .finish()
    }
}
