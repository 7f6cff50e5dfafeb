//! Fire-and-forget event dispatcher.
//!
//! `dispatch` never blocks the caller: events go onto an unbounded channel
//! drained by one delivery loop. Lifecycle events are always queued. Warning
//! events are dropped once the undelivered-warning backlog reaches the
//! configured buffer size, so a stage that warns on every poll cannot grow
//! memory without bound.

use super::subscriber::{EventFilter, EventSubscriber};
use super::types::TaskEvent;
use crate::config::DispatcherConfig;
use crate::error::{TaskError, TaskResult};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub dispatched: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscriber_errors: u64,
}

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    subscriber: Arc<dyn EventSubscriber>,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    subscriber_errors: AtomicU64,
}

pub struct EventDispatcher {
    sender: Mutex<Option<mpsc::UnboundedSender<TaskEvent>>>,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    next_id: AtomicU64,
    pending_warnings: Arc<AtomicUsize>,
    max_pending_warnings: usize,
    counters: Arc<Counters>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriptions", &self.subscriptions.read().len())
            .field("pending_warnings", &self.pending_warnings.load(Ordering::Relaxed))
            .field("max_pending_warnings", &self.max_pending_warnings)
            .field("closed", &self.sender.lock().is_none())
            .finish()
    }
}

impl EventDispatcher {
    /// Create a dispatcher whose delivery loop runs on `handle`.
    pub fn new(config: &DispatcherConfig, handle: &Handle) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(RwLock::new(Vec::new()));
        let pending_warnings = Arc::new(AtomicUsize::new(0));
        let counters = Arc::new(Counters::default());

        let delivery = handle.spawn(Self::delivery_loop(
            receiver,
            Arc::clone(&subscriptions),
            Arc::clone(&pending_warnings),
            Arc::clone(&counters),
        ));

        debug!(
            buffer_size = config.buffer_size,
            "Creating EventDispatcher for task events"
        );

        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            subscriptions,
            next_id: AtomicU64::new(1),
            pending_warnings,
            max_pending_warnings: config.buffer_size.max(1),
            counters,
            delivery: Mutex::new(Some(delivery)),
        })
    }

    /// Create a dispatcher on the ambient tokio runtime.
    pub fn try_current(config: &DispatcherConfig) -> TaskResult<Arc<Self>> {
        let handle = Handle::try_current()
            .map_err(|e| TaskError::RuntimeUnavailable(format!("event dispatcher: {e}")))?;
        Ok(Self::new(config, &handle))
    }

    pub fn subscribe(
        &self,
        filter: EventFilter,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(
            subscriber = subscriber.subscriber_name(),
            task_id = filter.task_id(),
            "Registering event subscriber"
        );
        self.subscriptions.write().push(Subscription {
            id,
            filter,
            subscriber,
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        subscriptions.len() != before
    }

    /// Remove every subscription scoped to `task_id`. Returns how many were removed.
    pub fn clear_event_stream(&self, task_id: &str) -> usize {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.filter.task_id() != Some(task_id));
        let removed = before - subscriptions.len();
        if removed > 0 {
            debug!(task_id = %task_id, removed = removed, "Cleared task event stream");
        }
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Queue an event for delivery. Never blocks.
    pub fn dispatch(&self, event: TaskEvent) {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let is_warning = !event.event_type().is_lifecycle();
        if is_warning
            && self.pending_warnings.fetch_add(1, Ordering::AcqRel) >= self.max_pending_warnings
        {
            self.pending_warnings.fetch_sub(1, Ordering::AcqRel);
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                task_id = %event.task_id(),
                "Warning backlog full - dropping warning event"
            );
            return;
        }

        let rejected = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(event).err().map(|e| e.0),
            None => Some(event),
        };
        if let Some(event) = rejected {
            if is_warning {
                self.pending_warnings.fetch_sub(1, Ordering::AcqRel);
            }
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                task_id = %event.task_id(),
                event_type = %event.event_type(),
                "Dispatcher closed - dropping event"
            );
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            subscriber_errors: self.counters.subscriber_errors.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting events. Events already queued are still delivered.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            info!(stats = ?self.stats(), "🛑 Event dispatcher shut down");
        }
    }

    /// Wait for the delivery loop to drain after [`shutdown`](Self::shutdown).
    pub async fn closed(&self) {
        let delivery = self.delivery.lock().take();
        if let Some(delivery) = delivery {
            if let Err(e) = delivery.await {
                warn!(error = %e, "Event delivery loop ended abnormally");
            }
        }
    }

    async fn delivery_loop(
        mut receiver: mpsc::UnboundedReceiver<TaskEvent>,
        subscriptions: Arc<RwLock<Vec<Subscription>>>,
        pending_warnings: Arc<AtomicUsize>,
        counters: Arc<Counters>,
    ) {
        while let Some(event) = receiver.recv().await {
            if !event.event_type().is_lifecycle() {
                pending_warnings.fetch_sub(1, Ordering::AcqRel);
            }

            let targets: Vec<Arc<dyn EventSubscriber>> = subscriptions
                .read()
                .iter()
                .filter(|subscription| subscription.filter.matches(&event))
                .map(|subscription| Arc::clone(&subscription.subscriber))
                .collect();

            for subscriber in targets {
                let outcome = AssertUnwindSafe(subscriber.on_event(&event))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(error)) => {
                        counters.subscriber_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            subscriber = subscriber.subscriber_name(),
                            task_id = %event.task_id(),
                            event_type = %event.event_type(),
                            error = %error,
                            "Event subscriber failed (fire-and-forget)"
                        );
                    }
                    Err(_) => {
                        counters.subscriber_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            subscriber = subscriber.subscriber_name(),
                            task_id = %event.task_id(),
                            event_type = %event.event_type(),
                            "Event subscriber panicked (fire-and-forget)"
                        );
                    }
                }
            }
        }
        debug!("Event delivery loop finished");
    }
}
