// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routes a task to the executor registered for its type.

use crate::executor::{ExecutorError, OutputChunk, TaskExecutor};
use mesh_core::{TaskId, TaskSpec, TaskType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Tagged-variant dispatch: `task.task_type` selects the adapter. Built at
/// startup; plugins may contribute an executor (e.g. for `subagent`)
/// before the daemon starts dispatching.
#[derive(Default, Clone)]
pub struct ExecutorRouter {
    executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
}

impl ExecutorRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under the type it reports. Last registration
    /// for a type wins.
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(executor.task_type(), executor);
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.executors.contains_key(&task_type)
    }

    pub async fn launch(
        &self,
        task_id: TaskId,
        spec: TaskSpec,
        output: mpsc::Sender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<i32, ExecutorError> {
        let task_type = spec.task_type();
        let Some(executor) = self.executors.get(&task_type) else {
            return Err(ExecutorError::NoExecutor(task_type));
        };
        executor.launch(task_id, spec, output, cancel).await
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
