use super::states::TaskState;
use thiserror::Error;

/// An illegal lifecycle transition. The holder's state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("origin state {origin} can not transfer to target state {target}")]
pub struct StateTransitionError {
    pub origin: TaskState,
    pub target: TaskState,
}

impl StateTransitionError {
    pub fn new(origin: TaskState, target: TaskState) -> Self {
        Self { origin, target }
    }
}

pub type StateTransitionResult<T> = Result<T, StateTransitionError>;
