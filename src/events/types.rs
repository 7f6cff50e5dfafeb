//! Event payloads published by tasks and their stage workers.

use crate::error::StageError;
use crate::task::ManagedTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where in the pipeline a warning or failure originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    ReaderFailed,
    ReaderToBufferFailed,
    ProcessorFailed,
    ProcessorToBufferFailed,
    WriterFailed,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReaderFailed => write!(f, "reader_failed"),
            Self::ReaderToBufferFailed => write!(f, "reader_to_buffer_failed"),
            Self::ProcessorFailed => write!(f, "processor_failed"),
            Self::ProcessorToBufferFailed => write!(f, "processor_to_buffer_failed"),
            Self::WriterFailed => write!(f, "writer_failed"),
        }
    }
}

/// Fieldless tag of [`TaskEventKind`], used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    Started,
    Stopped,
    Shutdown,
    Finished,
    Failed,
    Warning,
}

impl TaskEventType {
    pub const LIFECYCLE: [TaskEventType; 5] = [
        Self::Started,
        Self::Stopped,
        Self::Shutdown,
        Self::Finished,
        Self::Failed,
    ];

    /// Warnings are the only events the dispatcher may drop under load
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, Self::Warning)
    }
}

impl fmt::Display for TaskEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskEventKind {
    Started,
    Stopped,
    Shutdown,
    Finished,
    Failed { cause: Cause, error: Arc<StageError> },
    Warning { cause: Cause, error: Arc<StageError> },
}

impl TaskEventKind {
    pub fn event_type(&self) -> TaskEventType {
        match self {
            Self::Started => TaskEventType::Started,
            Self::Stopped => TaskEventType::Stopped,
            Self::Shutdown => TaskEventType::Shutdown,
            Self::Finished => TaskEventType::Finished,
            Self::Failed { .. } => TaskEventType::Failed,
            Self::Warning { .. } => TaskEventType::Warning,
        }
    }
}

/// A lifecycle, warning or failure notification about one task.
#[derive(Clone)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task: Arc<dyn ManagedTask>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(kind: TaskEventKind, task: Arc<dyn ManagedTask>) -> Self {
        Self {
            kind,
            task,
            timestamp: Utc::now(),
        }
    }

    pub fn task_id(&self) -> &str {
        self.task.task_id()
    }

    pub fn event_type(&self) -> TaskEventType {
        self.kind.event_type()
    }

    pub fn cause(&self) -> Option<Cause> {
        match &self.kind {
            TaskEventKind::Failed { cause, .. } | TaskEventKind::Warning { cause, .. } => {
                Some(*cause)
            }
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match &self.kind {
            TaskEventKind::Failed { error, .. } | TaskEventKind::Warning { error, .. } => {
                Some(error.as_ref())
            }
            _ => None,
        }
    }
}

impl fmt::Debug for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEvent")
            .field("kind", &self.kind)
            .field("task_id", &self.task_id())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_warning_is_droppable() {
        for event_type in TaskEventType::LIFECYCLE {
            assert!(event_type.is_lifecycle());
        }
        assert!(!TaskEventType::Warning.is_lifecycle());
    }

    #[test]
    fn test_kind_to_type() {
        let kind = TaskEventKind::Failed {
            cause: Cause::WriterFailed,
            error: Arc::new(StageError::permanent("disk full")),
        };
        assert_eq!(kind.event_type(), TaskEventType::Failed);
        assert_eq!(TaskEventKind::Finished.event_type(), TaskEventType::Finished);
    }

    #[test]
    fn test_cause_serde() {
        let json = serde_json::to_string(&Cause::ProcessorToBufferFailed).unwrap();
        assert_eq!(json, "\"processor_to_buffer_failed\"");
        assert_eq!(Cause::ReaderFailed.to_string(), "reader_failed");
    }
}
