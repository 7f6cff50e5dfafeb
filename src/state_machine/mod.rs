// Stage lifecycle state machine.
//
// `TaskState` is a plain enum with a pure legality table; `StateHolder` is the
// atomic slot each stage owns in the task context.

pub mod errors;
pub mod holder;
pub mod states;

pub use errors::{StateTransitionError, StateTransitionResult};
pub use holder::StateHolder;
pub use states::TaskState;
