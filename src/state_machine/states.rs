use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Built but never started
    New,
    /// Worker is pulling and pushing records
    Running,
    /// Graceful stop requested, worker drains what it already holds
    Stopping,
    /// Finished normally or shut down
    Terminated,
    /// A fatal error stopped the stage
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        Self::New,
        Self::Running,
        Self::Stopping,
        Self::Terminated,
        Self::Failed,
    ];

    pub fn can_run(&self) -> bool {
        matches!(self, Self::New | Self::Stopping)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn can_shutdown(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_final_state(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// Legality table for `origin -> target`.
    pub fn can_transfer(origin: TaskState, target: TaskState) -> bool {
        match target {
            Self::Running => origin.can_run(),
            Self::Stopping => origin.can_stop(),
            Self::Terminated => origin.can_shutdown(),
            Self::Failed => matches!(origin, Self::Running),
            Self::New => false,
        }
    }
}

impl From<TaskState> for u8 {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::New => 0,
            TaskState::Running => 1,
            TaskState::Stopping => 2,
            TaskState::Terminated => 3,
            TaskState::Failed => 4,
        }
    }
}

impl From<u8> for TaskState {
    fn from(value: u8) -> Self {
        match value {
            0 => TaskState::New,
            1 => TaskState::Running,
            2 => TaskState::Stopping,
            3 => TaskState::Terminated,
            _ => TaskState::Failed,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Terminated => write!(f, "terminated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "terminated" => Ok(Self::Terminated),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::New
    }
}
