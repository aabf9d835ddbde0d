// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client listener: the submitter ↔ leader protocol surface.
//!
//! Reads are answered from the local replica on any node; mutations
//! require the leader and come back `not_leader` (with a hint) elsewhere.
//! A `submit` resolves when its entry commits, per the protocol contract.

use crate::membership::MembershipManager;
use crate::scheduler::{self, OutputHub};
use crate::updater::RollingUpdater;
use mesh_core::entry::Command;
use mesh_core::{
    Clock, ClusterConfig, ErrorKind, RetryPolicy, Task, TaskId, TaskSpec, TaskState, Workflow,
    WorkflowDef, WorkflowState,
};
use mesh_raft::{ProposeError, RaftHandle};
use mesh_state::ClusterState;
use mesh_wire::{
    read_message, write_message, JoinRequestEntry, NodeSummary, ProtocolError, Request, Response,
    TaskDetail, TaskSummary, UpdateReport, WorkflowDetail, WorkflowSummary,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

pub struct ListenerCtx<C: Clock> {
    pub config: Arc<ClusterConfig>,
    pub raft: RaftHandle,
    pub state: Arc<RwLock<ClusterState>>,
    pub membership: Arc<MembershipManager<C>>,
    pub updater: Arc<RollingUpdater<C>>,
    pub hub: Arc<OutputHub>,
    pub clock: C,
    pub start_time: Instant,
    pub shutdown: Arc<Notify>,
}

/// Accept submitter connections and answer their requests.
pub async fn serve_clients<C: Clock + 'static>(listener: TcpListener, ctx: Arc<ListenerCtx<C>>) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "client listener ready"),
        Err(_) => info!("client listener ready"),
    }
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "client connected");
                tokio::spawn(handle_connection(stream, Arc::clone(&ctx)));
            }
            Err(e) => {
                warn!(error = %e, "client accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection<C: Clock>(mut stream: TcpStream, ctx: Arc<ListenerCtx<C>>) {
    loop {
        let request: Request = match read_message(&mut stream).await {
            Ok(request) => request,
            Err(ProtocolError::Closed) => return,
            Err(e) => {
                debug!(error = %e, "client read failed");
                return;
            }
        };

        // Follow writes a response stream itself; everything else is
        // one request, one response.
        if let Request::Follow { id } = &request {
            if follow(&mut stream, &ctx, id).await.is_err() {
                return;
            }
            continue;
        }

        let shutdown = matches!(request, Request::Shutdown);
        let response = handle_request(request, &ctx).await;
        if write_message(&mut stream, &response).await.is_err() {
            return;
        }
        if shutdown {
            ctx.shutdown.notify_waiters();
            return;
        }
    }
}

async fn handle_request<C: Clock>(request: Request, ctx: &Arc<ListenerCtx<C>>) -> Response {
    match request {
        Request::Ping => Response::Pong,
        Request::Hello { .. } => {
            Response::Hello { version: env!("CARGO_PKG_VERSION").to_string() }
        }

        Request::SubmitTask { spec, priority, constraints, retry } => {
            submit_task(ctx, spec, priority, constraints, retry).await
        }
        Request::SubmitWorkflow { definition } => submit_workflow(ctx, definition).await,
        Request::CancelTask { id } => cancel_task(ctx, &id).await,

        Request::TaskStatus { id } => {
            let state = ctx.state.read();
            Response::Task {
                task: state.get_task(&id).map(|t| Box::new(TaskDetail::from(t))),
            }
        }
        Request::TaskEvents { id } => {
            let state = ctx.state.read();
            match state.get_task(&id) {
                Some(task) => Response::TaskEvents {
                    events: state.events_for(&task.id).iter().map(Into::into).collect(),
                },
                None => Response::error(ErrorKind::InvalidRequest, format!("no task {id:?}")),
            }
        }
        Request::ListTasks { state: filter } => {
            let state = ctx.state.read();
            let mut tasks: Vec<TaskSummary> = state
                .tasks
                .values()
                .filter(|t| filter.map(|f| t.state == f).unwrap_or(true))
                .map(TaskSummary::from)
                .collect();
            tasks.sort_by_key(|t| t.created_at_ms);
            Response::Tasks { tasks }
        }

        Request::ListWorkflows => {
            let state = ctx.state.read();
            let mut workflows: Vec<WorkflowSummary> =
                state.workflows.values().map(WorkflowSummary::from_workflow).collect();
            workflows.sort_by_key(|w| w.created_at_ms);
            Response::Workflows { workflows }
        }
        Request::WorkflowStatus { id } => {
            let state = ctx.state.read();
            let workflow = state.get_workflow(&id).map(|wf| {
                let tasks = state
                    .workflow_tasks(&wf.id)
                    .into_iter()
                    .map(|(key, task)| (key.to_string(), task.state))
                    .collect();
                Box::new(WorkflowDetail {
                    summary: WorkflowSummary::from_workflow(wf),
                    tasks,
                    finished_at_ms: wf.finished_at_ms,
                })
            });
            Response::Workflow { workflow }
        }

        Request::ListNodes => {
            let state = ctx.state.read();
            let mut nodes: Vec<NodeSummary> =
                state.nodes.values().map(NodeSummary::from).collect();
            nodes.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
            Response::Nodes { nodes }
        }

        Request::ListJoinRequests => {
            if !ctx.raft.is_leader() {
                return Response::not_leader(ctx.raft.current_leader());
            }
            let requests = ctx
                .membership
                .pending_requests()
                .into_iter()
                .map(|(request_id, node)| JoinRequestEntry {
                    request_id,
                    node_id: node.id,
                    hostname: node.hostname,
                    tags: node.tags.into_iter().collect(),
                })
                .collect();
            Response::JoinRequests { requests }
        }
        Request::ApproveJoin { request_id } => {
            if !ctx.raft.is_leader() {
                return Response::not_leader(ctx.raft.current_leader());
            }
            match ctx.membership.approve(request_id).await {
                Ok(_) => Response::Ok,
                Err(crate::membership::ApprovalError::NotFound(id)) => {
                    Response::error(ErrorKind::InvalidRequest, format!("no join request {id}"))
                }
                Err(crate::membership::ApprovalError::Propose(e)) => propose_error(e),
            }
        }
        Request::RejectJoin { request_id } => {
            if !ctx.raft.is_leader() {
                return Response::not_leader(ctx.raft.current_leader());
            }
            if ctx.membership.reject(request_id) {
                Response::Ok
            } else {
                Response::error(
                    ErrorKind::InvalidRequest,
                    format!("no join request {request_id}"),
                )
            }
        }

        Request::DrainNode { id } => {
            propose_simple(ctx, Command::NodeDrain { node_id: id }).await
        }
        Request::RemoveNode { id } => {
            let offline = ctx
                .state
                .read()
                .get_node(&id)
                .map(|n| n.status == mesh_core::NodeStatus::Offline)
                .unwrap_or(false);
            if !offline {
                return Response::error(
                    ErrorKind::Conflict,
                    format!("node {id} is not offline; drain it first"),
                );
            }
            propose_simple(ctx, Command::NodeRemove { node_id: id }).await
        }

        Request::RollingUpdate { dry_run } => {
            if !ctx.raft.is_leader() {
                return Response::not_leader(ctx.raft.current_leader());
            }
            let report: UpdateReport = ctx.updater.initiate(dry_run).await;
            Response::UpdateReport { report }
        }

        Request::Status => status(ctx),
        Request::Shutdown => Response::ShuttingDown,

        // Handled before dispatch; unreachable here.
        Request::Follow { id } => {
            Response::error(ErrorKind::Internal, format!("follow {id} mis-routed"))
        }
    }
}

fn status<C: Clock>(ctx: &Arc<ListenerCtx<C>>) -> Response {
    let raft = ctx.raft.status();
    let state = ctx.state.read();
    Response::Status {
        node_id: ctx.config.node_id,
        role: raft.role.to_string(),
        term: raft.term,
        leader: raft.leader_id,
        uptime_secs: ctx.start_time.elapsed().as_secs(),
        nodes_active: state.active_nodes().count(),
        tasks_running: state.tasks_in_state(TaskState::Running).len()
            + state.tasks_in_state(TaskState::Assigned).len(),
        tasks_queued: state.tasks_in_state(TaskState::Queued).len(),
    }
}

fn validate_spec(spec: &TaskSpec) -> Result<(), String> {
    match spec {
        TaskSpec::Shell { command, .. } if command.trim().is_empty() => {
            Err("shell task needs a command".into())
        }
        TaskSpec::Container { image, .. } | TaskSpec::K8sJob { image, .. }
            if image.trim().is_empty() =>
        {
            Err("container task needs an image".into())
        }
        TaskSpec::Subagent { agent, .. } if agent.trim().is_empty() => {
            Err("subagent task needs an agent name".into())
        }
        _ => Ok(()),
    }
}

async fn submit_task<C: Clock>(
    ctx: &Arc<ListenerCtx<C>>,
    spec: TaskSpec,
    priority: i32,
    constraints: Option<mesh_core::TaskConstraints>,
    retry: Option<RetryPolicy>,
) -> Response {
    if !ctx.raft.is_leader() {
        return Response::not_leader(ctx.raft.current_leader());
    }
    if let Err(reason) = validate_spec(&spec) {
        return Response::error(ErrorKind::InvalidRequest, reason);
    }
    let constraints = constraints.unwrap_or_default();
    {
        let state = ctx.state.read();
        if !scheduler::satisfiable_by_any(&constraints, state.nodes.values()) {
            return Response::error(
                ErrorKind::NoEligibleNodes,
                "no known node can ever satisfy these constraints",
            );
        }
    }

    let task = Task {
        id: TaskId::new(),
        workflow_id: None,
        task_key: None,
        task_type: spec.task_type(),
        state: TaskState::Queued,
        priority,
        spec,
        constraints,
        retry: retry.unwrap_or_else(|| (&ctx.config.retry_default).into()),
        attempt: 0,
        assigned_node: None,
        created_at_ms: 0, // set from the entry at apply
        assigned_at_ms: None,
        started_at_ms: None,
        completed_at_ms: None,
        dead_lettered_at_ms: None,
        scheduled_after_ms: None,
        error: None,
        result: None,
    };
    let task_id = task.id;
    match propose(ctx, Command::TaskSubmit { task }).await {
        Ok(()) => Response::TaskSubmitted { task_id },
        Err(response) => response,
    }
}

async fn submit_workflow<C: Clock>(ctx: &Arc<ListenerCtx<C>>, definition: WorkflowDef) -> Response {
    if !ctx.raft.is_leader() {
        return Response::not_leader(ctx.raft.current_leader());
    }
    if definition.name.trim().is_empty() {
        return Response::error(ErrorKind::InvalidRequest, "workflow needs a name");
    }
    for (key, def) in &definition.tasks {
        if let Err(reason) = validate_spec(&def.spec) {
            return Response::error(
                ErrorKind::InvalidRequest,
                format!("task {key:?}: {reason}"),
            );
        }
    }

    let workflow_id = mesh_core::WorkflowId::new();
    let tasks: Vec<Task> = definition
        .tasks
        .iter()
        .map(|(key, def)| Task {
            id: TaskId::new(),
            workflow_id: Some(workflow_id),
            task_key: Some(key.clone()),
            task_type: def.spec.task_type(),
            state: TaskState::Pending,
            priority: def.priority,
            spec: def.spec.clone(),
            constraints: def.constraints.clone().unwrap_or_default(),
            retry: def
                .retry
                .clone()
                .unwrap_or_else(|| (&ctx.config.retry_default).into()),
            attempt: 0,
            assigned_node: None,
            created_at_ms: 0,
            assigned_at_ms: None,
            started_at_ms: None,
            completed_at_ms: None,
            dead_lettered_at_ms: None,
            scheduled_after_ms: None,
            error: None,
            result: None,
        })
        .collect();
    let workflow = Workflow {
        id: workflow_id,
        name: definition.name.clone(),
        state: WorkflowState::Running,
        context: definition.context.clone(),
        definition,
        created_at_ms: 0,
        finished_at_ms: None,
    };

    match propose(ctx, Command::WorkflowSubmit { workflow, tasks }).await {
        Ok(()) => Response::WorkflowSubmitted { workflow_id },
        Err(response) => response,
    }
}

async fn cancel_task<C: Clock>(ctx: &Arc<ListenerCtx<C>>, id: &str) -> Response {
    if !ctx.raft.is_leader() {
        return Response::not_leader(ctx.raft.current_leader());
    }
    let task_id: Option<TaskId> = {
        let state = ctx.state.read();
        state.get_task(id).map(|t| t.id)
    };
    let Some(task_id) = task_id else {
        return Response::error(ErrorKind::InvalidRequest, format!("no task {id:?}"));
    };
    // Cancelling a terminal task is benign; the apply is a no-op and the
    // caller sees success either way.
    match propose(ctx, Command::TaskCancel { task_id }).await {
        Ok(()) => Response::Ok,
        Err(response) => response,
    }
}

/// Propose and wait for commit, within the configured timeout.
async fn propose<C: Clock>(ctx: &Arc<ListenerCtx<C>>, command: Command) -> Result<(), Response> {
    let timeout = Duration::from_millis(ctx.config.propose_timeout_ms);
    match tokio::time::timeout(timeout, ctx.raft.propose(command)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(propose_error(e)),
        Err(_) => Err(Response::error(ErrorKind::Timeout, "proposal timed out; retry")),
    }
}

async fn propose_simple<C: Clock>(ctx: &Arc<ListenerCtx<C>>, command: Command) -> Response {
    if !ctx.raft.is_leader() {
        return Response::not_leader(ctx.raft.current_leader());
    }
    match propose(ctx, command).await {
        Ok(()) => Response::Ok,
        Err(response) => response,
    }
}

fn propose_error(e: ProposeError) -> Response {
    match e {
        ProposeError::NotLeader { hint } => Response::not_leader(hint),
        ProposeError::Unavailable => {
            Response::error(ErrorKind::Unavailable, "no quorum reachable; retry later")
        }
        ProposeError::Shutdown => Response::error(ErrorKind::Internal, "consensus stopped"),
    }
}

/// Stream a task's output until it ends. Returns Err when the client went
/// away.
async fn follow<C: Clock>(
    stream: &mut TcpStream,
    ctx: &Arc<ListenerCtx<C>>,
    id: &str,
) -> Result<(), ProtocolError> {
    let task: Option<(TaskId, bool)> = {
        let state = ctx.state.read();
        state.get_task(id).map(|t| (t.id, t.is_terminal()))
    };
    let Some((task_id, terminal)) = task else {
        let response =
            Response::error(ErrorKind::InvalidRequest, format!("no task {id:?}"));
        return write_message(stream, &response).await;
    };
    if terminal {
        return write_message(stream, &Response::OutputEnd { task_id }).await;
    }

    let (mut rx, status_lines) = ctx.hub.subscribe(task_id);
    for bytes in status_lines {
        let response = Response::Output {
            task_id,
            channel: mesh_core::OutputChannel::Status,
            bytes,
        };
        write_message(stream, &response).await?;
    }

    loop {
        match rx.recv().await {
            Ok((channel, bytes)) => {
                write_message(stream, &Response::Output { task_id, channel, bytes }).await?;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                // Backpressure: the oldest chunks were dropped for this
                // consumer.
                let note = format!("[{skipped} chunks dropped]").into_bytes();
                let response = Response::Output {
                    task_id,
                    channel: mesh_core::OutputChannel::Status,
                    bytes: note,
                };
                write_message(stream, &response).await?;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    write_message(stream, &Response::OutputEnd { task_id }).await
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
