use super::errors::{StateTransitionError, StateTransitionResult};
use super::states::TaskState;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Atomic state slot for one stage.
///
/// The owning worker and lifecycle callers race on this value, so every
/// checked transition is a compare-and-set against the legality table.
pub struct StateHolder {
    state: AtomicU8,
}

impl StateHolder {
    pub fn new() -> Self {
        Self::with_state(TaskState::New)
    }

    pub fn with_state(state: TaskState) -> Self {
        Self {
            state: AtomicU8::new(state.into()),
        }
    }

    pub fn get(&self) -> TaskState {
        TaskState::from(self.state.load(Ordering::Acquire))
    }

    /// Checked transition. Returns the previous state.
    pub fn transfer(&self, target: TaskState) -> StateTransitionResult<TaskState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let origin = TaskState::from(current);
            if !TaskState::can_transfer(origin, target) {
                return Err(StateTransitionError::new(origin, target));
            }
            match self.state.compare_exchange_weak(
                current,
                target.into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(origin),
                Err(actual) => current = actual,
            }
        }
    }

    /// Worker-side write. A terminal state already set by shutdown or a
    /// failure wins, in which case the current state is returned unchanged.
    pub fn settle(&self, target: TaskState) -> TaskState {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let origin = TaskState::from(current);
            if origin.is_final_state() {
                return origin;
            }
            match self.state.compare_exchange_weak(
                current,
                target.into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return target,
                Err(actual) => current = actual,
            }
        }
    }

    /// Unconditional store, bypassing the legality table. Returns the previous state.
    pub fn force(&self, target: TaskState) -> TaskState {
        TaskState::from(self.state.swap(target.into(), Ordering::AcqRel))
    }
}

impl Default for StateHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateHolder").field(&self.get()).finish()
    }
}
