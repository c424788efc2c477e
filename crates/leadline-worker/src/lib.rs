//! Leadline Worker – background task queue and allocation worker.
//!
//! This crate provides the task queue (polling, LISTEN/NOTIFY, retry,
//! worker pool) and the allocate-operator handler. Handlers return a
//! [`leadline_core::TaskOutcome`]; the queue interprets it.

mod allocate;
mod context;
mod queue;

pub use allocate::{AllocateOperatorHandler, CAPACITY_RETRY_DELAY, VISIBILITY_RETRY_LIMIT};
pub use context::{Dispatcher, TaskDispatch};
pub use queue::{TaskQueue, TaskQueueConfig};
