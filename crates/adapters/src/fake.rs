// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted executor for tests: no processes, no containers.

use crate::executor::{ExecutorError, OutputChunk, TaskExecutor};
use async_trait::async_trait;
use mesh_core::{TaskId, TaskSpec, TaskType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the fake should do for one command string.
#[derive(Debug, Clone)]
struct Script {
    exit_code: i32,
    stdout: String,
    stderr: String,
    /// Never finish; only cancellation ends the launch.
    hang: bool,
}

/// A record of one observed launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub task_id: TaskId,
    pub command: String,
}

/// Test double covering the shell task type. Unscripted commands succeed
/// with exit 0 and no output.
#[derive(Default, Clone)]
pub struct FakeExecutor {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    launches: Arc<Mutex<Vec<LaunchRecord>>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, command: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.scripts.lock().insert(
            command.to_string(),
            Script {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                hang: false,
            },
        );
    }

    /// Make a command hang until cancelled.
    pub fn script_hang(&self, command: &str) {
        self.scripts.lock().insert(
            command.to_string(),
            Script { exit_code: 0, stdout: String::new(), stderr: String::new(), hang: true },
        );
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().clone()
    }
}

#[async_trait]
impl TaskExecutor for FakeExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::Shell
    }

    async fn launch(
        &self,
        task_id: TaskId,
        spec: TaskSpec,
        output: mpsc::Sender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<i32, ExecutorError> {
        let TaskSpec::Shell { command, .. } = spec else {
            return Err(ExecutorError::NoExecutor(TaskType::Shell));
        };
        self.launches.lock().push(LaunchRecord { task_id, command: command.clone() });

        let script = self.scripts.lock().get(&command).cloned().unwrap_or(Script {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            hang: false,
        });

        if script.hang {
            cancel.cancelled().await;
            return Err(ExecutorError::Cancelled);
        }
        if !script.stdout.is_empty() {
            let _ = output.send(OutputChunk::stdout(script.stdout.into_bytes())).await;
        }
        if !script.stderr.is_empty() {
            let _ = output.send(OutputChunk::stderr(script.stderr.into_bytes())).await;
        }
        Ok(script.exit_code)
    }
}
