//! Builder wiring a task's stages, buffers, executor and dispatcher.

use super::{ManagedTask, StagePolicies, Task};
use crate::buffer::DataBuffer;
use crate::config::{EngineConfig, StageConfig};
use crate::context::{TaskContext, TaskParameters, TotalHint};
use crate::error::{TaskError, TaskResult};
use crate::events::EventDispatcher;
use crate::execution::TaskExecutor;
use crate::manager::{TaskManager, TaskReporter};
use crate::processor::{PassThrough, Processor, ProcessorChain};
use crate::reader::Reader;
use crate::writer::Writer;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

pub struct TaskBuilder<I: Send + 'static, O: Send + 'static> {
    task_id: Option<String>,
    reader: Option<Arc<dyn Reader<I>>>,
    chain: Option<ProcessorChain<I, O>>,
    writer: Option<Arc<dyn Writer<O>>>,
    parameters: TaskParameters,
    parameter_errors: Vec<String>,
    total: TotalHint,
    reporters: Vec<Arc<dyn TaskReporter>>,
    report_period: Option<Duration>,
    timeout: Option<Duration>,
    read_buffer_size: Option<usize>,
    write_buffer_size: Option<usize>,
    handle: Option<Handle>,
    manager: Option<Arc<TaskManager>>,
    dispatcher: Option<Arc<EventDispatcher>>,
    config: Option<EngineConfig>,
}

impl<I: Send + 'static, O: Send + 'static> Default for TaskBuilder<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Send + 'static, O: Send + 'static> TaskBuilder<I, O> {
    pub fn new() -> Self {
        Self {
            task_id: None,
            reader: None,
            chain: None,
            writer: None,
            parameters: TaskParameters::new(),
            parameter_errors: Vec::new(),
            total: TotalHint::Unknown,
            reporters: Vec::new(),
            report_period: None,
            timeout: None,
            read_buffer_size: None,
            write_buffer_size: None,
            handle: None,
            manager: None,
            dispatcher: None,
            config: None,
        }
    }

    /// Defaults to a random UUID.
    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn reader<R: Reader<I>>(mut self, reader: R) -> Self {
        self.reader = Some(Arc::new(reader));
        self
    }

    /// Single-processor chain.
    pub fn processor<P: Processor<I, O>>(mut self, processor: P) -> Self {
        self.chain = Some(ProcessorChain::new(processor));
        self
    }

    pub fn processor_chain(mut self, chain: ProcessorChain<I, O>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn writer<W: Writer<O>>(mut self, writer: W) -> Self {
        self.writer = Some(Arc::new(writer));
        self
    }

    /// Store a task parameter. Serialization failures surface from `build`.
    pub fn parameter<T: Serialize>(mut self, key: impl Into<String>, value: T) -> Self {
        let key = key.into();
        if let Err(e) = self.parameters.insert(key.clone(), value) {
            self.parameter_errors.push(format!("{key}: {e}"));
        }
        self
    }

    pub fn parameters(mut self, parameters: TaskParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn total(mut self, total: u64) -> Self {
        self.total = TotalHint::Fixed(total);
        self
    }

    /// Expected total computed on demand, for sources that can count cheaply.
    pub fn total_with(mut self, supplier: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.total = TotalHint::Supplied(Arc::new(supplier));
        self
    }

    pub fn add_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn report_period(mut self, period: Duration) -> Self {
        self.report_period = Some(period);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn read_buffer_size(mut self, capacity: usize) -> Self {
        self.read_buffer_size = Some(capacity);
        self
    }

    pub fn write_buffer_size(mut self, capacity: usize) -> Self {
        self.write_buffer_size = Some(capacity);
        self
    }

    /// Runtime the stage workers are spawned on.
    pub fn executor(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn manager(mut self, manager: &Arc<TaskManager>) -> Self {
        self.manager = Some(Arc::clone(manager));
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<EventDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> TaskResult<Arc<Task<I, O>>> {
        if !self.parameter_errors.is_empty() {
            return Err(TaskError::ParameterError(self.parameter_errors.join("; ")));
        }

        let task_id = self
            .task_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if task_id.trim().is_empty() {
            return Err(TaskError::BuildError("task id must not be empty".to_string()));
        }
        let reader = self
            .reader
            .ok_or_else(|| TaskError::BuildError(format!("task {task_id}: reader is required")))?;
        let chain = self.chain.ok_or_else(|| {
            TaskError::BuildError(format!(
                "task {task_id}: processor chain is required (use passthrough() for same-typed pipelines)"
            ))
        })?;
        let writer = self
            .writer
            .ok_or_else(|| TaskError::BuildError(format!("task {task_id}: writer is required")))?;

        let engine = match (self.config, self.manager.as_ref()) {
            (Some(config), _) => config,
            (None, Some(manager)) => manager.config().clone(),
            (None, None) => EngineConfig::default(),
        };
        engine.validate()?;

        let handle = match (self.handle, self.manager.as_ref()) {
            (Some(handle), _) => handle,
            (None, Some(manager)) => manager.handle().clone(),
            (None, None) => Handle::try_current()
                .map_err(|e| TaskError::RuntimeUnavailable(format!("task {task_id}: {e}")))?,
        };

        let dispatcher = match (self.dispatcher, self.manager.as_ref()) {
            (Some(dispatcher), Some(manager)) if !Arc::ptr_eq(&dispatcher, manager.dispatcher()) => {
                return Err(TaskError::BuildError(format!(
                    "task {task_id}: a managed task must use its manager's dispatcher"
                )));
            }
            (Some(dispatcher), _) => dispatcher,
            (None, Some(manager)) => Arc::clone(manager.dispatcher()),
            (None, None) => EventDispatcher::new(&engine.dispatcher, &handle),
        };

        let read_capacity = self.read_buffer_size.unwrap_or(engine.buffer.buffer_size);
        let write_capacity = self.write_buffer_size.unwrap_or(engine.buffer.buffer_size);
        if read_capacity == 0 || write_capacity == 0 || chain.explicit_capacities().any(|c| c == 0) {
            return Err(TaskError::BuildError(format!(
                "task {task_id}: buffer capacities must be greater than 0"
            )));
        }

        let context = Arc::new(TaskContext::new(
            task_id.clone(),
            chain.len(),
            self.parameters,
            self.total,
            dispatcher,
        ));
        let read_buffer = Arc::new(DataBuffer::new(read_capacity));
        let write_buffer = Arc::new(DataBuffer::new(write_capacity));
        let nodes = chain.bind(
            Arc::clone(&read_buffer),
            Arc::clone(&write_buffer),
            engine.buffer.buffer_size,
        );

        let policies = StagePolicies {
            reader: resolve_policy(&task_id, "reader", reader.config(), &engine.reader)?,
            processors: nodes
                .iter()
                .map(|node| {
                    resolve_policy(&task_id, node.name(), node.config_override(), &engine.processor)
                })
                .collect::<TaskResult<Vec<_>>>()?,
            writer: resolve_policy(&task_id, "writer", writer.config(), &engine.writer)?,
        };

        debug!(
            task_id = %task_id,
            processors = nodes.len(),
            read_capacity = read_capacity,
            write_capacity = write_capacity,
            "Building task"
        );

        let manager = self.manager.as_ref().map(Arc::downgrade);
        let task = Arc::new_cyclic(|me| Task {
            context: Arc::clone(&context),
            reader,
            read_buffer,
            nodes,
            writer,
            write_buffer,
            executor: TaskExecutor::new(handle),
            policies,
            engine,
            reporters: self.reporters,
            report_period: self.report_period,
            timeout: self.timeout,
            manager,
            me: me.clone(),
        });

        let managed: Weak<dyn ManagedTask> = Arc::downgrade(&task) as Weak<dyn ManagedTask>;
        context.bind_task(managed);
        Ok(task)
    }
}

impl<T: Send + 'static> TaskBuilder<T, T> {
    /// Identity processor for pipelines that only move records.
    pub fn passthrough(self) -> Self {
        self.processor(PassThrough::new())
    }
}

fn resolve_policy(
    task_id: &str,
    stage: &str,
    stage_override: Option<StageConfig>,
    engine_default: &StageConfig,
) -> TaskResult<StageConfig> {
    let policy = stage_override.unwrap_or_else(|| engine_default.clone());
    if policy.produce_retry_times == 0 || policy.max_consume_count == 0 {
        return Err(TaskError::BuildError(format!(
            "task {task_id}: stage {stage} needs produce_retry_times and max_consume_count above 0"
        )));
    }
    Ok(policy)
}
