//! Leadline persistence layer.
//!
//! `db` holds the queue task repository; `store` holds the transactional
//! unit-of-work seam used by the allocation workflow, with a PostgreSQL
//! implementation and an in-memory implementation for tests and local
//! development.

pub mod db;
pub mod store;

pub use db::task::{TaskRepository, TASK_NOTIFY_CHANNEL};
pub use store::{AllocationStore, AllocationUow, MemoryAllocationStore, PgAllocationStore};
