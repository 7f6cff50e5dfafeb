//! Proptest strategies for the property-based tests.

use pipeline_core::state_machine::TaskState;
use proptest::prelude::*;

pub fn task_state_strategy() -> impl Strategy<Value = TaskState> {
    prop::sample::select(TaskState::ALL.to_vec())
}

/// A sequence of requested target states, as lifecycle calls and workers would issue them.
pub fn transition_sequence_strategy() -> impl Strategy<Value = Vec<TaskState>> {
    prop::collection::vec(task_state_strategy(), 0..32)
}

/// Operation applied to a buffer in the capacity/FIFO model test.
#[derive(Debug, Clone)]
pub enum BufferOp {
    Produce(u32),
    Consume(usize),
}

pub fn buffer_ops_strategy() -> impl Strategy<Value = Vec<BufferOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => any::<u32>().prop_map(BufferOp::Produce),
            2 => (0usize..8).prop_map(BufferOp::Consume),
        ],
        0..128,
    )
}
