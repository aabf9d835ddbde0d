// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The consensus driver task.
//!
//! One [`RaftNode`] per process. It owns every piece of volatile Raft
//! state and is the only writer of the durable metadata file; commands,
//! peer messages, and timers are serialized through its single loop, so no
//! consensus state is ever touched concurrently.

use crate::handle::{Applied, DriverCommand, ProposeError, RaftHandle, RaftStatus};
use crate::log::RaftLog;
use crate::message::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, RaftMessage, RequestVoteArgs,
    RequestVoteReply,
};
use crate::metadata::{Metadata, MetadataError, MetadataStore};
use crate::transport::RaftTransport;
use mesh_core::entry::{Command, LogEntry, LogIndex, Term};
use mesh_core::node::NodeId;
use mesh_core::Clock;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How many entries one AppendEntries batch may carry.
const MAX_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

mesh_core::simple_display! {
    RaftRole {
        Follower => "follower",
        Candidate => "candidate",
        Leader => "leader",
    }
}

pub struct RaftConfig {
    /// This node's id.
    pub id: NodeId,
    /// Replication targets: every other cluster member, voting or not.
    pub peers: Vec<NodeId>,
    /// The voting set. A node absent from it is an observer: it receives
    /// entries but never times out into an election.
    pub voters: Vec<NodeId>,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    /// Where `(term, voted_for)` lives.
    pub meta_path: PathBuf,
}

impl RaftConfig {
    /// Single-voter configuration with the default timings.
    pub fn single(id: NodeId, meta_path: PathBuf) -> Self {
        Self {
            id,
            peers: Vec::new(),
            voters: vec![id],
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            meta_path,
        }
    }
}

pub struct RaftNode<C: Clock> {
    config: RaftConfig,
    clock: C,
    transport: Arc<dyn RaftTransport>,

    meta: Metadata,
    store: MetadataStore,
    log: RaftLog,
    role: RaftRole,
    leader_id: Option<NodeId>,
    commit_index: LogIndex,
    /// Highest index already pushed onto the apply bus.
    delivered: LogIndex,

    votes: HashSet<NodeId>,
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,
    /// Proposals awaiting commit, keyed by their log index.
    pending: BTreeMap<LogIndex, oneshot::Sender<Result<(LogIndex, Term), ProposeError>>>,
    /// Latest compacted state, forwarded to followers that fell behind.
    snapshot_blob: Option<Vec<u8>>,

    election_deadline: Instant,
    heartbeat_deadline: Instant,

    rx: mpsc::Receiver<DriverCommand>,
    apply_tx: mpsc::Sender<Applied>,
    status_tx: watch::Sender<RaftStatus>,
}

impl<C: Clock> RaftNode<C> {
    /// Build the driver. `snapshot` is the `(last_index, term)` boundary the
    /// local state-machine snapshot covers, when one was loaded.
    pub fn new(
        config: RaftConfig,
        clock: C,
        transport: Arc<dyn RaftTransport>,
        snapshot: Option<(LogIndex, Term)>,
    ) -> Result<(Self, RaftHandle, mpsc::Receiver<Applied>), MetadataError> {
        let store = MetadataStore::new(config.meta_path.clone());
        let meta = store.load()?;
        let log = match snapshot {
            Some((index, term)) => RaftLog::from_snapshot(index, term),
            None => RaftLog::new(),
        };
        let delivered = log.snapshot_index();

        let (tx, rx) = mpsc::channel(1024);
        let (apply_tx, apply_rx) = mpsc::channel(256);
        let (status_tx, status_rx) = watch::channel(RaftStatus {
            term: meta.current_term,
            commit_index: log.snapshot_index(),
            last_log_index: log.last_index(),
            ..RaftStatus::default()
        });

        let now = Instant::now();
        let node = Self {
            commit_index: log.snapshot_index(),
            delivered,
            meta,
            store,
            log,
            clock,
            transport,
            role: RaftRole::Follower,
            leader_id: None,
            votes: HashSet::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            pending: BTreeMap::new(),
            snapshot_blob: None,
            election_deadline: now + random_timeout(&config),
            heartbeat_deadline: now,
            config,
            rx,
            apply_tx,
            status_tx,
        };
        let handle = RaftHandle { tx, status_rx };
        Ok((node, handle, apply_rx))
    }

    /// Drive consensus until the handle side is dropped. A metadata write
    /// failure is fatal: consensus must not continue without durable votes.
    pub async fn run(mut self) -> Result<(), MetadataError> {
        info!(id = %self.config.id, voters = self.config.voters.len(), "consensus driver started");
        loop {
            self.publish_status();
            let deadline = match self.role {
                RaftRole::Leader => self.heartbeat_deadline,
                _ => self.election_deadline,
            };
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await?,
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => self.on_timer().await?,
            }
        }
        info!(id = %self.config.id, "consensus driver stopped");
        Ok(())
    }

    fn is_voter(&self) -> bool {
        self.config.voters.contains(&self.config.id)
    }

    fn quorum(&self) -> usize {
        self.config.voters.len() / 2 + 1
    }

    fn reset_election_deadline(&mut self) {
        let timeout = if self.is_voter() {
            random_timeout(&self.config)
        } else {
            // Observers never campaign; just keep the timer far away.
            Duration::from_secs(3600)
        };
        self.election_deadline = Instant::now() + timeout;
    }

    fn publish_status(&self) {
        let next = RaftStatus {
            role: self.role,
            term: self.meta.current_term,
            leader_id: self.leader_id,
            commit_index: self.commit_index,
            last_log_index: self.log.last_index(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn handle_command(&mut self, cmd: DriverCommand) -> Result<(), MetadataError> {
        match cmd {
            DriverCommand::Propose { command, reply } => self.propose(command, reply).await?,
            DriverCommand::Inbound { from, msg } => self.handle_message(from, msg).await?,
            DriverCommand::SetMembers { peers, voters } => {
                for peer in &peers {
                    self.next_index.entry(*peer).or_insert(self.log.last_index() + 1);
                    self.match_index.entry(*peer).or_insert(0);
                }
                self.next_index.retain(|id, _| peers.contains(id));
                self.match_index.retain(|id, _| peers.contains(id));
                self.config.peers = peers;
                self.config.voters = voters;
            }
            DriverCommand::Compact { last_index, snapshot } => {
                self.log.compact_to(last_index);
                self.snapshot_blob = Some(snapshot);
            }
            DriverCommand::StepDown { reply } => {
                let was_leader = self.role == RaftRole::Leader;
                if was_leader {
                    info!(term = self.meta.current_term, "yielding leadership");
                    self.role = RaftRole::Follower;
                    self.leader_id = None;
                    self.fail_pending(ProposeError::NotLeader { hint: None });
                    // Stand back so another voter wins the next election.
                    self.election_deadline =
                        Instant::now() + self.config.election_timeout_max * 2;
                }
                let _ = reply.send(was_leader);
            }
        }
        Ok(())
    }

    async fn on_timer(&mut self) -> Result<(), MetadataError> {
        match self.role {
            RaftRole::Leader => {
                self.heartbeat_deadline = Instant::now() + self.config.heartbeat_interval;
                self.broadcast_append().await;
            }
            _ => self.start_election().await?,
        }
        Ok(())
    }

    // === Elections ===

    async fn start_election(&mut self) -> Result<(), MetadataError> {
        if !self.is_voter() {
            self.reset_election_deadline();
            return Ok(());
        }
        self.meta.current_term += 1;
        self.meta.voted_for = Some(self.config.id);
        self.store.save(&self.meta)?;

        self.role = RaftRole::Candidate;
        self.leader_id = None;
        self.votes = HashSet::from([self.config.id]);
        self.reset_election_deadline();
        debug!(term = self.meta.current_term, "starting election");

        if self.votes.len() >= self.quorum() {
            self.become_leader().await;
            return Ok(());
        }

        let args = RequestVoteArgs {
            term: self.meta.current_term,
            candidate_id: self.config.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for peer in self.voting_peers() {
            self.transport.send(&peer, RaftMessage::RequestVote(args.clone())).await;
        }
        Ok(())
    }

    fn voting_peers(&self) -> Vec<NodeId> {
        self.config
            .voters
            .iter()
            .filter(|id| **id != self.config.id)
            .copied()
            .collect()
    }

    async fn become_leader(&mut self) {
        info!(term = self.meta.current_term, id = %self.config.id, "won election");
        self.role = RaftRole::Leader;
        self.leader_id = Some(self.config.id);
        let next = self.log.last_index() + 1;
        for peer in &self.config.peers {
            self.next_index.insert(*peer, next);
            self.match_index.insert(*peer, 0);
        }
        self.heartbeat_deadline = Instant::now() + self.config.heartbeat_interval;
        self.broadcast_append().await;
    }

    /// Observe a higher term: persist it and fall back to follower.
    async fn adopt_term(&mut self, term: Term) -> Result<(), MetadataError> {
        if term <= self.meta.current_term {
            return Ok(());
        }
        self.meta.current_term = term;
        self.meta.voted_for = None;
        self.store.save(&self.meta)?;
        if self.role == RaftRole::Leader {
            self.fail_pending(ProposeError::NotLeader { hint: None });
        }
        self.role = RaftRole::Follower;
        self.leader_id = None;
        self.votes.clear();
        Ok(())
    }

    // === Proposals ===

    async fn propose(
        &mut self,
        command: Command,
        reply: oneshot::Sender<Result<(LogIndex, Term), ProposeError>>,
    ) -> Result<(), MetadataError> {
        if self.role != RaftRole::Leader {
            let _ = reply.send(Err(ProposeError::NotLeader { hint: self.leader_id }));
            return Ok(());
        }
        let entry = LogEntry {
            index: self.log.last_index() + 1,
            term: self.meta.current_term,
            appended_at_ms: self.clock.epoch_ms(),
            command,
        };
        let index = entry.index;
        self.log.append(entry);
        self.pending.insert(index, reply);
        self.advance_commit().await;
        if self.role == RaftRole::Leader {
            self.broadcast_append().await;
        }
        Ok(())
    }

    fn fail_pending(&mut self, error: ProposeError) {
        for (_, reply) in std::mem::take(&mut self.pending) {
            let _ = reply.send(Err(error.clone()));
        }
    }

    // === Replication ===

    async fn broadcast_append(&mut self) {
        for peer in self.config.peers.clone() {
            self.send_append(&peer).await;
        }
    }

    async fn send_append(&mut self, peer: &NodeId) {
        let next = *self.next_index.get(peer).unwrap_or(&(self.log.last_index() + 1));
        match self.log.suffix(next) {
            Some(mut entries) => {
                entries.truncate(MAX_BATCH);
                let prev_log_index = next - 1;
                let Some(prev_log_term) = self.log.term_at(prev_log_index) else {
                    warn!(peer = %peer, prev_log_index, "log hole below next_index");
                    return;
                };
                let args = AppendEntriesArgs {
                    term: self.meta.current_term,
                    leader_id: self.config.id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: self.commit_index,
                };
                self.transport.send(peer, RaftMessage::AppendEntries(args)).await;
            }
            // Peer is behind the compaction horizon: full-state catch-up.
            None => match &self.snapshot_blob {
                Some(data) => {
                    let args = InstallSnapshotArgs {
                        term: self.meta.current_term,
                        leader_id: self.config.id,
                        last_included_index: self.log.snapshot_index(),
                        last_included_term: self.log.snapshot_term(),
                        data: data.clone(),
                    };
                    self.transport.send(peer, RaftMessage::InstallSnapshot(args)).await;
                }
                None => warn!(peer = %peer, "peer behind compaction horizon and no snapshot held"),
            },
        }
    }

    async fn advance_commit(&mut self) {
        if self.role != RaftRole::Leader {
            return;
        }
        // Majority-replicated index: self counts with its full log.
        let mut indexes: Vec<LogIndex> = self
            .config
            .voters
            .iter()
            .map(|id| {
                if *id == self.config.id {
                    self.log.last_index()
                } else {
                    *self.match_index.get(id).unwrap_or(&0)
                }
            })
            .collect();
        indexes.sort_unstable_by(|a, b| b.cmp(a));
        let Some(&candidate) = indexes.get(self.quorum() - 1) else {
            return;
        };
        // Only entries of the current term commit by counting (§5.4.2).
        if candidate > self.commit_index
            && self.log.term_at(candidate) == Some(self.meta.current_term)
        {
            self.commit_index = candidate;
            self.deliver_committed().await;
            self.resolve_pending();
        }
    }

    fn resolve_pending(&mut self) {
        let committed: Vec<LogIndex> =
            self.pending.range(..=self.commit_index).map(|(i, _)| *i).collect();
        for index in committed {
            if let Some(reply) = self.pending.remove(&index) {
                let term = self.log.term_at(index).unwrap_or(self.meta.current_term);
                let _ = reply.send(Ok((index, term)));
            }
        }
    }

    async fn deliver_committed(&mut self) {
        while self.delivered < self.commit_index {
            let next = self.delivered + 1;
            let Some(entry) = self.log.get(next).cloned() else {
                warn!(index = next, "committed entry missing from log");
                return;
            };
            if self.apply_tx.send(Applied::Entry(entry)).await.is_err() {
                return;
            }
            self.delivered = next;
        }
    }

    // === Message handling ===

    async fn handle_message(
        &mut self,
        from: NodeId,
        msg: RaftMessage,
    ) -> Result<(), MetadataError> {
        match msg {
            RaftMessage::RequestVote(args) => self.on_request_vote(from, args).await,
            RaftMessage::RequestVoteReply(reply) => self.on_vote_reply(from, reply).await,
            RaftMessage::AppendEntries(args) => self.on_append_entries(from, args).await,
            RaftMessage::AppendEntriesReply(reply) => self.on_append_reply(from, reply).await,
            RaftMessage::InstallSnapshot(args) => self.on_install_snapshot(from, args).await,
            RaftMessage::InstallSnapshotReply { term, match_index } => {
                self.adopt_term(term).await?;
                if self.role == RaftRole::Leader {
                    self.match_index.insert(from, match_index);
                    self.next_index.insert(from, match_index + 1);
                    self.advance_commit().await;
                }
                Ok(())
            }
        }
    }

    async fn on_request_vote(
        &mut self,
        from: NodeId,
        args: RequestVoteArgs,
    ) -> Result<(), MetadataError> {
        self.adopt_term(args.term).await?;

        let up_to_date = self.log.up_to_date(args.last_log_term, args.last_log_index);
        let free_to_vote = self
            .meta
            .voted_for
            .map(|v| v == args.candidate_id)
            .unwrap_or(true);
        let grant = args.term == self.meta.current_term && free_to_vote && up_to_date;

        if grant {
            self.meta.voted_for = Some(args.candidate_id);
            self.store.save(&self.meta)?;
            self.reset_election_deadline();
        }
        debug!(candidate = %args.candidate_id, term = args.term, grant, "vote requested");
        let reply = RequestVoteReply { term: self.meta.current_term, vote_granted: grant };
        self.transport.send(&from, RaftMessage::RequestVoteReply(reply)).await;
        Ok(())
    }

    async fn on_vote_reply(
        &mut self,
        from: NodeId,
        reply: RequestVoteReply,
    ) -> Result<(), MetadataError> {
        self.adopt_term(reply.term).await?;
        if self.role != RaftRole::Candidate
            || reply.term != self.meta.current_term
            || !reply.vote_granted
        {
            return Ok(());
        }
        self.votes.insert(from);
        if self.votes.len() >= self.quorum() {
            self.become_leader().await;
        }
        Ok(())
    }

    async fn on_append_entries(
        &mut self,
        from: NodeId,
        args: AppendEntriesArgs,
    ) -> Result<(), MetadataError> {
        if args.term < self.meta.current_term {
            let reply = AppendEntriesReply {
                term: self.meta.current_term,
                success: false,
                conflict_hint: self.log.last_index(),
                match_index: 0,
            };
            self.transport.send(&from, RaftMessage::AppendEntriesReply(reply)).await;
            return Ok(());
        }
        self.adopt_term(args.term).await?;
        // A current-term AppendEntries settles who leads this term.
        if self.role != RaftRole::Follower {
            self.role = RaftRole::Follower;
            self.fail_pending(ProposeError::NotLeader { hint: Some(args.leader_id) });
        }
        self.leader_id = Some(args.leader_id);
        self.reset_election_deadline();

        // Log-matching check at (prev_log_index, prev_log_term).
        let prefix_ok = args.prev_log_index <= self.log.snapshot_index()
            || self.log.term_at(args.prev_log_index) == Some(args.prev_log_term);
        if !prefix_ok {
            let reply = AppendEntriesReply {
                term: self.meta.current_term,
                success: false,
                conflict_hint: self.log.last_index().min(args.prev_log_index),
                match_index: 0,
            };
            self.transport.send(&from, RaftMessage::AppendEntriesReply(reply)).await;
            return Ok(());
        }

        let mut last_new = args.prev_log_index.max(self.log.snapshot_index());
        for entry in args.entries {
            if entry.index <= self.log.snapshot_index() {
                continue;
            }
            match self.log.term_at(entry.index) {
                Some(term) if term == entry.term => {
                    last_new = entry.index;
                }
                Some(_) => {
                    // Conflicting suffix: ours loses.
                    self.log.truncate_from(entry.index);
                    last_new = entry.index;
                    self.log.append(entry);
                }
                None => {
                    last_new = entry.index;
                    self.log.append(entry);
                }
            }
        }

        if args.leader_commit > self.commit_index {
            self.commit_index = args.leader_commit.min(self.log.last_index());
            self.deliver_committed().await;
        }

        let reply = AppendEntriesReply {
            term: self.meta.current_term,
            success: true,
            conflict_hint: 0,
            match_index: last_new,
        };
        self.transport.send(&from, RaftMessage::AppendEntriesReply(reply)).await;
        Ok(())
    }

    async fn on_append_reply(
        &mut self,
        from: NodeId,
        reply: AppendEntriesReply,
    ) -> Result<(), MetadataError> {
        self.adopt_term(reply.term).await?;
        if self.role != RaftRole::Leader || reply.term != self.meta.current_term {
            return Ok(());
        }
        if reply.success {
            let matched = self.match_index.entry(from).or_insert(0);
            *matched = (*matched).max(reply.match_index);
            self.next_index.insert(from, reply.match_index + 1);
            self.advance_commit().await;
            // Keep streaming if the follower is still behind.
            if reply.match_index < self.log.last_index() {
                self.send_append(&from).await;
            }
        } else {
            let next = self.next_index.entry(from).or_insert(1);
            *next = (*next).saturating_sub(1).max(1).min(reply.conflict_hint + 1);
            self.send_append(&from).await;
        }
        Ok(())
    }

    async fn on_install_snapshot(
        &mut self,
        from: NodeId,
        args: InstallSnapshotArgs,
    ) -> Result<(), MetadataError> {
        if args.term < self.meta.current_term {
            let reply = RaftMessage::InstallSnapshotReply {
                term: self.meta.current_term,
                match_index: 0,
            };
            self.transport.send(&from, reply).await;
            return Ok(());
        }
        self.adopt_term(args.term).await?;
        self.role = RaftRole::Follower;
        self.leader_id = Some(args.leader_id);
        self.reset_election_deadline();

        if args.last_included_index > self.commit_index {
            info!(
                last_included = args.last_included_index,
                "installing snapshot from leader"
            );
            self.log =
                RaftLog::from_snapshot(args.last_included_index, args.last_included_term);
            self.commit_index = args.last_included_index;
            self.delivered = args.last_included_index;
            let _ = self
                .apply_tx
                .send(Applied::Snapshot {
                    last_index: args.last_included_index,
                    term: args.last_included_term,
                    data: args.data,
                })
                .await;
        }
        let reply = RaftMessage::InstallSnapshotReply {
            term: self.meta.current_term,
            match_index: self.log.snapshot_index(),
        };
        self.transport.send(&from, reply).await;
        Ok(())
    }
}

fn random_timeout(config: &RaftConfig) -> Duration {
    let min = config.election_timeout_min.as_millis() as u64;
    let max = config.election_timeout_max.as_millis() as u64;
    let ms = if max > min { rand::thread_rng().gen_range(min..=max) } else { min };
    Duration::from_millis(ms)
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
