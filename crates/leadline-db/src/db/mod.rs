//! Database repositories for the queue storage layer.

pub mod task;
