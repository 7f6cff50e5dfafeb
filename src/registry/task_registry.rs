//! Serialized registry of live tasks.
//!
//! Every mutation (register, unregister, eviction, expiry, report
//! bookkeeping) takes the same lock, so the manager's subscriber, the
//! reporter scheduler and callers never interleave.

use crate::config::RegistryConfig;
use crate::logging::log_registry_operation;
use crate::task::ManagedTask;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

struct Entry {
    task: Arc<dyn ManagedTask>,
    registered_at: Instant,
    last_reported: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub registered: u64,
    pub unregistered: u64,
    pub evicted: u64,
    pub expired: u64,
}

pub struct TaskRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    stats: Mutex<RegistryStats>,
    maximum_size: Option<usize>,
    timeout: Duration,
}

impl TaskRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(config.initial_capacity)),
            stats: Mutex::new(RegistryStats::default()),
            maximum_size: config.maximum_size,
            timeout: config.timeout(),
        }
    }

    /// Register `task`, replacing an entry with the same id.
    ///
    /// At the maximum size the oldest entry is evicted and returned. Evicted
    /// tasks are only untracked; they keep running.
    pub fn register(&self, task: Arc<dyn ManagedTask>) -> Option<Arc<dyn ManagedTask>> {
        let task_id = task.task_id().to_string();
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.contains_key(&task_id) {
            warn!(task_id = %task_id, "Task already registered - replacing entry");
        }

        let mut evicted = None;
        if let Some(maximum_size) = self.maximum_size {
            if !entries.contains_key(&task_id) && entries.len() >= maximum_size {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.registered_at)
                    .map(|(id, _)| id.clone());
                if let Some(oldest) = oldest {
                    if let Some(entry) = entries.remove(&oldest) {
                        warn!(
                            task_id = %oldest,
                            maximum_size = maximum_size,
                            "Registry full - evicting oldest task"
                        );
                        self.stats.lock().evicted += 1;
                        evicted = Some(entry.task);
                    }
                }
            }
        }

        entries.insert(
            task_id.clone(),
            Entry {
                task,
                registered_at: now,
                last_reported: now,
            },
        );
        self.stats.lock().registered += 1;
        log_registry_operation("register", &task_id, entries.len(), None);
        evicted
    }

    pub fn unregister(&self, task_id: &str) -> Option<Arc<dyn ManagedTask>> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(task_id).map(|entry| entry.task);
        if removed.is_some() {
            self.stats.lock().unregistered += 1;
            log_registry_operation("unregister", task_id, entries.len(), None);
        }
        removed
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<dyn ManagedTask>> {
        self.entries
            .lock()
            .get(task_id)
            .map(|entry| Arc::clone(&entry.task))
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.lock().contains_key(task_id)
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn tasks(&self) -> Vec<Arc<dyn ManagedTask>> {
        self.entries
            .lock()
            .values()
            .map(|entry| Arc::clone(&entry.task))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove every entry, returning the tasks that were registered.
    pub fn clear(&self) -> Vec<Arc<dyn ManagedTask>> {
        let drained: Vec<_> = self
            .entries
            .lock()
            .drain()
            .map(|(_, entry)| entry.task)
            .collect();
        self.stats.lock().unregistered += drained.len() as u64;
        drained
    }

    /// Remove and return tasks registered longer than their timeout
    /// (the task's own, else the registry default).
    pub fn purge_expired(&self, now: Instant) -> Vec<Arc<dyn ManagedTask>> {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| {
                let timeout = entry.task.timeout().unwrap_or(self.timeout);
                now.saturating_duration_since(entry.registered_at) >= timeout
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut purged = Vec::with_capacity(expired.len());
        for task_id in expired {
            if let Some(entry) = entries.remove(&task_id) {
                log_registry_operation("expire", &task_id, entries.len(), Some("timeout elapsed"));
                purged.push(entry.task);
            }
        }
        self.stats.lock().expired += purged.len() as u64;
        purged
    }

    /// Tasks whose reporting period elapsed since their last report. Marks
    /// them reported as of `now`.
    pub fn due_for_report(
        &self,
        now: Instant,
        default_period: Duration,
    ) -> Vec<Arc<dyn ManagedTask>> {
        let mut entries = self.entries.lock();
        entries
            .values_mut()
            .filter_map(|entry| {
                let period = entry.task.report_period().unwrap_or(default_period);
                if now.saturating_duration_since(entry.last_reported) >= period {
                    entry.last_reported = now;
                    Some(Arc::clone(&entry.task))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.lock().clone()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.len())
            .field("maximum_size", &self.maximum_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}
