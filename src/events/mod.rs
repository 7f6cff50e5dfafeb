//! # Task Events
//!
//! In-process pub/sub for task lifecycle, warning and failure events. Stage
//! workers publish without blocking; a single delivery loop fans events out
//! to subscribers in publish order.

pub mod dispatcher;
pub mod subscriber;
pub mod types;

pub use dispatcher::{DispatcherStats, EventDispatcher, SubscriptionId};
pub use subscriber::{subscriber_fn, EventFilter, EventSubscriber, FnSubscriber};
pub use types::{Cause, TaskEvent, TaskEventKind, TaskEventType};
