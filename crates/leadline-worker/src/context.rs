//! Task dispatch seam.
//!
//! The queue holds a `TaskDispatch` and calls `dispatch_task` for each
//! claimed task; the implementation matches on task type and invokes the
//! appropriate handler.

use anyhow::Result;
use async_trait::async_trait;

use leadline_core::models::{Task, TaskType};
use leadline_core::TaskOutcome;

use crate::allocate::AllocateOperatorHandler;

/// Dispatches a claimed task to its handler and returns the outcome.
#[async_trait]
pub trait TaskDispatch: Send + Sync {
    async fn dispatch_task(&self, task: &Task) -> Result<TaskOutcome>;
}

/// Default dispatcher over the registered handlers.
pub struct Dispatcher {
    allocate: AllocateOperatorHandler,
}

impl Dispatcher {
    pub fn new(allocate: AllocateOperatorHandler) -> Self {
        Self { allocate }
    }
}

#[async_trait]
impl TaskDispatch for Dispatcher {
    async fn dispatch_task(&self, task: &Task) -> Result<TaskOutcome> {
        match task.task_type {
            TaskType::AllocateOperator => self.allocate.handle(task).await,
        }
    }
}
