//! Subscriber trait and subscription filters.

use super::types::{TaskEvent, TaskEventType};
use async_trait::async_trait;
use std::collections::HashSet;

/// Receives events from an [`EventDispatcher`](super::EventDispatcher).
///
/// Errors are logged and counted by the dispatcher; they never reach the
/// publishing task.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn on_event(&self, event: &TaskEvent) -> anyhow::Result<()>;

    /// Get the name of this subscriber for logging
    fn subscriber_name(&self) -> &str {
        "unnamed_subscriber"
    }
}

/// Which events a subscription receives.
///
/// A filter scoped to a task id is removed when that task's event stream is
/// cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    types: Option<HashSet<TaskEventType>>,
    task_id: Option<String>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            types: None,
            task_id: Some(task_id.into()),
        }
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = TaskEventType>) -> Self {
        self.types
            .get_or_insert_with(HashSet::new)
            .extend(types);
        self
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn matches(&self, event: &TaskEvent) -> bool {
        let type_matches = self
            .types
            .as_ref()
            .map_or(true, |types| types.contains(&event.event_type()));
        let task_matches = self
            .task_id
            .as_deref()
            .map_or(true, |task_id| task_id == event.task_id());
        type_matches && task_matches
    }
}

/// Adapter turning a synchronous closure into a subscriber.
pub struct FnSubscriber<F> {
    name: String,
    callback: F,
}

pub fn subscriber_fn<F>(name: impl Into<String>, callback: F) -> FnSubscriber<F>
where
    F: Fn(&TaskEvent) -> anyhow::Result<()> + Send + Sync,
{
    FnSubscriber {
        name: name.into(),
        callback,
    }
}

#[async_trait]
impl<F> EventSubscriber for FnSubscriber<F>
where
    F: Fn(&TaskEvent) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }

    fn subscriber_name(&self) -> &str {
        &self.name
    }
}
