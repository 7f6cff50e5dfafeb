#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Pipeline Core
//!
//! Staged data-migration engine: a reader, a chain of processors and a writer,
//! each running as its own tokio task and joined by bounded buffers.
//!
//! ## Overview
//!
//! A [`Task`](task::Task) moves records from a [`Reader`](reader::Reader)
//! through a [`ProcessorChain`](processor::ProcessorChain) into a
//! [`Writer`](writer::Writer). Every stage owns one [`TaskState`] slot in the
//! shared [`TaskContext`](context::TaskContext), and a downstream stage keeps
//! draining its input until the upstream stage leaves `RUNNING` and the
//! buffer between them is empty. Backpressure comes from the buffers: a full
//! buffer makes the producing stage wait, retry and eventually drop the
//! record with a warning.
//!
//! ## Module Organization
//!
//! - [`buffer`] - Bounded async FIFO between stages
//! - [`chunk`] - Batches of records handed from stage to stage
//! - [`state_machine`] - Stage states and the atomic state slot
//! - [`context`] - Per-task parameters, counters and stage states
//! - [`reader`], [`processor`], [`writer`] - Stage traits and adapters
//! - [`execution`] - Stage workers, produce retry and the task executor
//! - [`events`] - Lifecycle events and the asynchronous dispatcher
//! - [`task`] - Task façade and builder
//! - [`registry`] - Running tasks tracked for reporting and expiry
//! - [`manager`] - Owner of the registry, dispatcher and reporter scheduler
//! - [`config`] - Configuration loading
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipeline_core::config::EngineConfig;
//! use pipeline_core::manager::TaskManager;
//! use pipeline_core::reader::IterReader;
//! use pipeline_core::writer::writer_fn;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TaskManager::new(EngineConfig::default())?;
//!
//! let task = manager
//!     .task_builder::<u64, u64>()
//!     .task_id("copy-users")
//!     .reader(IterReader::new(0..10_000u64, 500))
//!     .passthrough()
//!     .writer(writer_fn(|chunk| Ok(chunk.len())))
//!     .build()?;
//!
//! task.start()?;
//! task.join().await?;
//! println!("{:?}", task.report());
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod manager;
pub mod processor;
pub mod reader;
pub mod registry;
pub mod state_machine;
pub mod task;
pub mod writer;

pub use buffer::DataBuffer;
pub use chunk::DataChunk;
pub use config::{ConfigManager, EngineConfig, StageConfig};
pub use context::{TaskContext, TaskParameters};
pub use error::{ErrorCategory, StageError, StageResult, TaskError, TaskResult};
pub use events::{
    Cause, EventDispatcher, EventFilter, EventSubscriber, TaskEvent, TaskEventKind, TaskEventType,
};
pub use execution::{StageKind, TaskExecutor};
pub use manager::{TaskManager, TaskReport, TaskReporter};
pub use processor::{Processor, ProcessorChain};
pub use reader::Reader;
pub use registry::TaskRegistry;
pub use state_machine::{StateHolder, StateTransitionError, TaskState};
pub use task::{ManagedTask, Task, TaskBuilder};
pub use writer::Writer;
