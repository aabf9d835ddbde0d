// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell executor: `sh -c` in its own process group.

use crate::executor::{ExecutorError, OutputChunk, TaskExecutor};
use async_trait::async_trait;
use mesh_core::{OutputChannel, TaskId, TaskSpec, TaskType};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exit code reported when the child died to a signal without a code.
const KILLED_EXIT_CODE: i32 = 137;

#[derive(Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
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
        let TaskSpec::Shell { command, env, cwd } = spec else {
            return Err(ExecutorError::NoExecutor(TaskType::Shell));
        };
        debug!(task = %task_id, %command, "launching shell task");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command);
        cmd.envs(&env);
        if let Some(cwd) = &cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // Own process group so cancellation reaches the whole pipeline.
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_pump = stdout.map(|r| pump(r, OutputChannel::Stdout, output.clone()));
        let err_pump = stderr.map(|r| pump(r, OutputChannel::Stderr, output.clone()));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                warn!(task = %task_id, "cancelling shell task");
                if let Some(pgid) = pgid {
                    let _ = killpg(pgid, Signal::SIGTERM);
                }
                // Give the group a moment, then make sure.
                let grace = tokio::time::timeout(
                    std::time::Duration::from_secs(5),
                    child.wait(),
                ).await;
                if grace.is_err() {
                    if let Some(pgid) = pgid {
                        let _ = killpg(pgid, Signal::SIGKILL);
                    }
                    let _ = child.wait().await;
                }
                if let Some(pump) = out_pump { let _ = pump.await; }
                if let Some(pump) = err_pump { let _ = pump.await; }
                return Err(ExecutorError::Cancelled);
            }
        };

        if let Some(pump) = out_pump {
            let _ = pump.await;
        }
        if let Some(pump) = err_pump {
            let _ = pump.await;
        }
        Ok(status.code().unwrap_or(KILLED_EXIT_CODE))
    }
}

/// Forward a child pipe to the output channel in 8 KiB reads.
fn pump<R>(
    mut reader: R,
    channel: OutputChannel,
    output: mpsc::Sender<OutputChunk>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = OutputChunk { channel, bytes: buf[..n].to_vec() };
                    if output.send(chunk).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
