//! # Task Manager
//!
//! Explicitly constructed owner of the registry, the shared event
//! dispatcher and the reporter scheduler. Tasks built with a manager publish
//! on its dispatcher; the manager's subscriber registers them on `Started`
//! and unregisters them (clearing their event stream) on `Shutdown`,
//! `Finished` or `Failed`.

pub mod reporter;
pub mod scheduler;

pub use reporter::{LoggingReporter, TaskReport, TaskReporter};
pub use scheduler::ReporterScheduler;

use crate::config::EngineConfig;
use crate::error::{TaskError, TaskResult};
use crate::events::{
    EventDispatcher, EventFilter, EventSubscriber, SubscriptionId, TaskEvent, TaskEventKind,
    TaskEventType,
};
use crate::registry::TaskRegistry;
use crate::task::{ManagedTask, TaskBuilder};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keeps the registry in step with task lifecycle events.
struct ManagerSubscriber {
    registry: Arc<TaskRegistry>,
    dispatcher: Weak<EventDispatcher>,
}

#[async_trait]
impl EventSubscriber for ManagerSubscriber {
    async fn on_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
        match &event.kind {
            TaskEventKind::Started => {
                if let Some(evicted) = self.registry.register(Arc::clone(&event.task)) {
                    warn!(
                        task_id = %evicted.task_id(),
                        "Evicted task is no longer tracked by the manager"
                    );
                }
            }
            TaskEventKind::Shutdown | TaskEventKind::Finished | TaskEventKind::Failed { .. } => {
                if let Some(dispatcher) = self.dispatcher.upgrade() {
                    dispatcher.clear_event_stream(event.task_id());
                }
                self.registry.unregister(event.task_id());
            }
            TaskEventKind::Stopped | TaskEventKind::Warning { .. } => {}
        }
        Ok(())
    }

    fn subscriber_name(&self) -> &str {
        "task_manager"
    }
}

pub struct TaskManager {
    config: EngineConfig,
    handle: Handle,
    dispatcher: Arc<EventDispatcher>,
    registry: Arc<TaskRegistry>,
    default_reporters: Arc<RwLock<Vec<Arc<dyn TaskReporter>>>>,
    subscription: SubscriptionId,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl TaskManager {
    /// Create a manager on the ambient tokio runtime.
    pub fn new(config: EngineConfig) -> TaskResult<Arc<Self>> {
        let handle = Handle::try_current()
            .map_err(|e| TaskError::RuntimeUnavailable(format!("task manager: {e}")))?;
        Self::with_handle(config, handle)
    }

    pub fn with_handle(config: EngineConfig, handle: Handle) -> TaskResult<Arc<Self>> {
        config.validate()?;

        let dispatcher = EventDispatcher::new(&config.dispatcher, &handle);
        let registry = Arc::new(TaskRegistry::new(&config.registry));
        let default_reporters: Arc<RwLock<Vec<Arc<dyn TaskReporter>>>> =
            Arc::new(RwLock::new(vec![Arc::new(LoggingReporter)]));

        let subscription = dispatcher.subscribe(
            EventFilter::all().with_types([
                TaskEventType::Started,
                TaskEventType::Shutdown,
                TaskEventType::Finished,
                TaskEventType::Failed,
            ]),
            Arc::new(ManagerSubscriber {
                registry: Arc::clone(&registry),
                dispatcher: Arc::downgrade(&dispatcher),
            }),
        );

        let scheduler = ReporterScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&default_reporters),
            &config.reporter,
        )
        .spawn(&handle);

        info!(
            report_period_seconds = config.reporter.report_period_seconds,
            maximum_size = config.registry.maximum_size,
            "🚀 Task manager started"
        );

        Ok(Arc::new(Self {
            config,
            handle,
            dispatcher,
            registry,
            default_reporters,
            subscription,
            scheduler: Mutex::new(Some(scheduler)),
            shut_down: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn task_count(&self) -> usize {
        self.registry.len()
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<dyn ManagedTask>> {
        self.registry.get(task_id)
    }

    /// Reporter used for tasks that were built without their own.
    pub fn add_reporter(&self, reporter: Arc<dyn TaskReporter>) {
        self.default_reporters.write().push(reporter);
    }

    /// Replace the default reporters.
    pub fn set_reporters(&self, reporters: Vec<Arc<dyn TaskReporter>>) {
        *self.default_reporters.write() = reporters;
    }

    /// Builder pre-wired to this manager's runtime, dispatcher and config.
    pub fn task_builder<I, O>(self: &Arc<Self>) -> TaskBuilder<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        TaskBuilder::new().manager(self)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Shut down every registered task, clear the registry and stop the
    /// scheduler and the dispatcher. Returns how many tasks were shut down.
    pub fn shutdown(&self) -> usize {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        self.dispatcher.unsubscribe(self.subscription);
        let tasks = self.registry.clear();
        let mut stopped = 0;
        for task in &tasks {
            match task.shutdown() {
                Ok(()) => stopped += 1,
                Err(e) => debug!(task_id = %task.task_id(), error = %e, "Task was not running"),
            }
            self.dispatcher.clear_event_stream(task.task_id());
        }

        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.abort();
        }
        self.dispatcher.shutdown();

        info!(tasks = tasks.len(), shut_down = stopped, "🛑 Task manager shut down");
        stopped
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.get_mut().take() {
            scheduler.abort();
        }
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
