// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The executor contract.

use async_trait::async_trait;
use mesh_core::{OutputChannel, TaskId, TaskSpec, TaskType};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("no executor registered for task type {0}")]
    NoExecutor(mesh_core::TaskType),
    #[error("kubernetes error: {0}")]
    K8s(String),
    #[error("cancelled before completion")]
    Cancelled,
}

/// One piece of task output, in per-channel order.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputChunk {
    pub channel: OutputChannel,
    pub bytes: Vec<u8>,
}

impl OutputChunk {
    pub fn stdout(bytes: impl Into<Vec<u8>>) -> Self {
        Self { channel: OutputChannel::Stdout, bytes: bytes.into() }
    }

    pub fn stderr(bytes: impl Into<Vec<u8>>) -> Self {
        Self { channel: OutputChannel::Stderr, bytes: bytes.into() }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self { channel: OutputChannel::Status, bytes: text.into().into_bytes() }
    }
}

/// Launches one task and sees it through to an exit code.
///
/// Contract: output chunks are sent in order per channel while the task
/// runs; the method returns the exit code once the task ends. On
/// cancellation the executor terminates the work best-effort and returns
/// [`ExecutorError::Cancelled`].
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// The task type this executor serves (used by the router).
    fn task_type(&self) -> TaskType;

    async fn launch(
        &self,
        task_id: TaskId,
        spec: TaskSpec,
        output: mpsc::Sender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<i32, ExecutorError>;
}
