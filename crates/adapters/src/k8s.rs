// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes Job executor.
//!
//! Creates one Job per task, polls it to completion, and fetches the pod
//! log as the task's stdout once it ends. Cancellation deletes the Job
//! (foreground propagation takes the pods with it).

use crate::executor::{ExecutorError, OutputChunk, TaskExecutor};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use mesh_core::{TaskId, TaskSpec, TaskType};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_NAMESPACE: &str = "default";

pub struct K8sJobExecutor {
    client: Client,
}

impl K8sJobExecutor {
    /// Connect using the ambient kubeconfig / in-cluster environment.
    pub async fn from_env() -> Result<Self, ExecutorError> {
        let client = Client::try_default().await.map_err(|e| ExecutorError::K8s(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn job_name(task_id: &TaskId) -> String {
        // Job names must be DNS-safe; task ids already are, modulo case.
        format!("mesh-{}", task_id.as_str().to_ascii_lowercase())
    }

    fn job_manifest(
        name: &str,
        image: &str,
        command: &[String],
        env: &std::collections::HashMap<String, String>,
    ) -> Result<Job, ExecutorError> {
        let env_json: Vec<serde_json::Value> = env
            .iter()
            .map(|(k, v)| serde_json::json!({ "name": k, "value": v }))
            .collect();
        let mut container = serde_json::json!({
            "name": "task",
            "image": image,
            "env": env_json,
        });
        if !command.is_empty() {
            container["command"] = serde_json::json!(command);
        }
        serde_json::from_value(serde_json::json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": name, "labels": { "app.kubernetes.io/managed-by": "meshd" } },
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "metadata": { "labels": { "job-name": name } },
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [container],
                    }
                }
            }
        }))
        .map_err(|e| ExecutorError::K8s(e.to_string()))
    }
}

#[async_trait]
impl TaskExecutor for K8sJobExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::K8sJob
    }

    async fn launch(
        &self,
        task_id: TaskId,
        spec: TaskSpec,
        output: mpsc::Sender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<i32, ExecutorError> {
        let TaskSpec::K8sJob { image, command, namespace, env } = spec else {
            return Err(ExecutorError::NoExecutor(TaskType::K8sJob));
        };
        let namespace = namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        let name = Self::job_name(&task_id);
        debug!(task = %task_id, %image, %namespace, job = %name, "creating kubernetes job");

        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let manifest = Self::job_manifest(&name, &image, &command, &env)?;
        jobs.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| ExecutorError::K8s(e.to_string()))?;
        let _ = output.send(OutputChunk::status(format!("job {name} created"))).await;

        // Poll the Job until a terminal condition shows up.
        let exit_code = loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => {
                    warn!(task = %task_id, job = %name, "cancelling kubernetes job");
                    let _ = jobs.delete(&name, &DeleteParams::foreground()).await;
                    return Err(ExecutorError::Cancelled);
                }
            }
            let job = jobs.get(&name).await.map_err(|e| ExecutorError::K8s(e.to_string()))?;
            let status = job.status.unwrap_or_default();
            if status.succeeded.unwrap_or(0) > 0 {
                break 0;
            }
            if status.failed.unwrap_or(0) > 0 {
                break 1;
            }
        };

        // Surface the pod log as the task's stdout.
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(&format!("job-name={name}")))
            .await
            .map_err(|e| ExecutorError::K8s(e.to_string()))?;
        if let Some(pod_name) = list.items.first().and_then(|p| p.metadata.name.clone()) {
            match pods.logs(&pod_name, &LogParams::default()).await {
                Ok(logs) => {
                    let _ = output.send(OutputChunk::stdout(logs.into_bytes())).await;
                }
                Err(e) => warn!(pod = %pod_name, error = %e, "failed to fetch job logs"),
            }
        }

        let _ = jobs.delete(&name, &DeleteParams::background()).await;
        Ok(exit_code)
    }
}
