// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container executor: `docker run` with a task-derived container name so
//! cancellation can `docker kill` it from outside.

use crate::executor::{ExecutorError, OutputChunk, TaskExecutor};
use async_trait::async_trait;
use mesh_core::{OutputChannel, TaskId, TaskSpec, TaskType};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const KILLED_EXIT_CODE: i32 = 137;

pub struct ContainerExecutor {
    /// Container runtime binary; `docker` by default, `podman` works too.
    runtime: String,
}

impl Default for ContainerExecutor {
    fn default() -> Self {
        Self { runtime: "docker".to_string() }
    }
}

impl ContainerExecutor {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self { runtime: runtime.into() }
    }

    fn container_name(task_id: &TaskId) -> String {
        format!("mesh-{}", task_id.as_str())
    }
}

#[async_trait]
impl TaskExecutor for ContainerExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::Container
    }

    async fn launch(
        &self,
        task_id: TaskId,
        spec: TaskSpec,
        output: mpsc::Sender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<i32, ExecutorError> {
        let TaskSpec::Container { image, command, env } = spec else {
            return Err(ExecutorError::NoExecutor(TaskType::Container));
        };
        let name = Self::container_name(&task_id);
        debug!(task = %task_id, %image, container = %name, "launching container task");

        let mut cmd = Command::new(&self.runtime);
        cmd.arg("run").arg("--rm").arg("--name").arg(&name);
        for (key, value) in &env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.arg(&image);
        cmd.args(&command);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let out_tx = output.clone();
        let out_pump = tokio::spawn(async move {
            if let Some(mut reader) = stdout {
                let mut buf = [0u8; 8192];
                while let Ok(n) = reader.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let chunk =
                        OutputChunk { channel: OutputChannel::Stdout, bytes: buf[..n].to_vec() };
                    if out_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            }
        });
        let err_tx = output.clone();
        let err_pump = tokio::spawn(async move {
            if let Some(mut reader) = stderr {
                let mut buf = [0u8; 8192];
                while let Ok(n) = reader.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let chunk =
                        OutputChunk { channel: OutputChannel::Stderr, bytes: buf[..n].to_vec() };
                    if err_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            }
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                warn!(task = %task_id, container = %name, "cancelling container task");
                let _ = Command::new(&self.runtime)
                    .arg("kill")
                    .arg(&name)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                let _ = child.wait().await;
                let _ = out_pump.await;
                let _ = err_pump.await;
                return Err(ExecutorError::Cancelled);
            }
        };

        let _ = out_pump.await;
        let _ = err_pump.await;
        Ok(status.code().unwrap_or(KILLED_EXIT_CODE))
    }
}
