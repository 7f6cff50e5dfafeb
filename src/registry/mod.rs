//! # Task Registry
//!
//! Tracks the live tasks of a [`TaskManager`](crate::manager::TaskManager):
//! registration on start, removal on shutdown/finish/failure, size-bounded
//! eviction and expiry, and the bookkeeping behind periodic reporting.

pub mod task_registry;

pub use task_registry::{RegistryStats, TaskRegistry};
