// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster configuration.
//!
//! Loaded once at startup from a TOML file; every timing knob the daemon
//! uses lives here so tests can shrink them and operators can tune them.
//! Unknown keys are rejected: a typo'd knob should fail loudly at startup
//! (exit code 2), not silently fall back to a default.

use crate::node::NodeId;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which column breaks placement ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerTieBreak {
    #[default]
    Cpu,
    Memory,
    Lexicographic,
}

/// Default retry policy applied when a task omits one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryDefaults {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable: bool,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            max_retries: p.max_retries,
            backoff_ms: p.backoff_ms,
            backoff_multiplier: p.backoff_multiplier,
            retryable: p.retryable,
        }
    }
}

impl From<&RetryDefaults> for RetryPolicy {
    fn from(d: &RetryDefaults) -> Self {
        Self {
            max_retries: d.max_retries,
            backoff_ms: d.backoff_ms,
            backoff_multiplier: d.backoff_multiplier,
            retryable: d.retryable,
        }
    }
}

/// Per-plugin settings; everything beyond `enabled` is plugin-defined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub enabled: bool,
    #[serde(flatten)]
    pub options: HashMap<String, toml::Value>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:7410".into()
}

fn default_client_bind_addr() -> String {
    "127.0.0.1:7411".into()
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Stable identifier for this node; must be unique in the mesh.
    pub node_id: NodeId,
    /// Address peers dial for consensus/dispatch traffic.
    pub bind_addr: String,
    /// Address other nodes should dial to reach this one; defaults to
    /// `bind_addr` (set it when binding a wildcard address).
    pub advertise_addr: Option<String>,
    /// Address submitters dial for the client protocol.
    pub client_bind_addr: String,
    /// State directory; defaults to `~/.local/state/mesh` when empty.
    pub data_dir: Option<PathBuf>,
    /// Seed peers, `id@host:port`.
    pub peers: Vec<String>,
    /// Free-form tags for this node (`ephemeral` is well-known).
    pub tags: Vec<String>,

    // === Consensus timing ===
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,

    // === Membership ===
    /// How often each node reports its resource snapshot to the leader.
    pub node_heartbeat_interval_ms: u64,
    /// Offline-detection threshold from last seen.
    pub heartbeat_timeout_ms: u64,
    /// Delay before removing offline ephemeral nodes.
    pub ephemeral_cleanup_ttl_ms: u64,
    /// How often the ephemeral sweep runs.
    pub ephemeral_sweep_interval_ms: u64,
    /// Bypass manual approval for nodes tagged `ephemeral`.
    pub auto_approve_ephemeral: bool,
    /// Tags that bypass manual approval.
    pub auto_approve_tags: Vec<String>,
    /// Give up joining an existing cluster after this long (exit code 4).
    pub join_timeout_ms: u64,

    // === Tasks & scheduling ===
    pub retry_default: RetryDefaults,
    pub scheduler_tie_break: SchedulerTieBreak,
    /// Per-stream backpressure threshold for dispatch output.
    pub dispatch_stream_buffer_bytes: usize,
    pub propose_timeout_ms: u64,

    // === Rolling updates ===
    pub drain_timeout_ms: u64,
    pub update_rejoin_timeout_ms: u64,

    // === Persistence ===
    /// Snapshot the state machine every N applied entries.
    pub snapshot_every: u64,

    pub plugins: HashMap<String, PluginSettings>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::from_string("n1"),
            bind_addr: default_bind_addr(),
            advertise_addr: None,
            client_bind_addr: default_client_bind_addr(),
            data_dir: None,
            peers: Vec::new(),
            tags: Vec::new(),
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            node_heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            ephemeral_cleanup_ttl_ms: 3_600_000,
            ephemeral_sweep_interval_ms: 60_000,
            auto_approve_ephemeral: true,
            auto_approve_tags: Vec::new(),
            join_timeout_ms: 30_000,
            retry_default: RetryDefaults::default(),
            scheduler_tie_break: SchedulerTieBreak::default(),
            dispatch_stream_buffer_bytes: 1024 * 1024,
            propose_timeout_ms: 5_000,
            drain_timeout_ms: 60_000,
            update_rejoin_timeout_ms: 30_000,
            snapshot_every: 512,
            plugins: HashMap::new(),
        }
    }
}

impl ClusterConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Ok(toml::from_str(&raw)?)
    }

    /// Parse a seed peer string, `id@host:port`.
    pub fn parse_peer(s: &str) -> Option<(NodeId, String)> {
        let (id, addr) = s.split_once('@')?;
        if id.is_empty() || addr.is_empty() {
            return None;
        }
        Some((NodeId::from_string(id), addr.to_string()))
    }

    /// The address peers should dial for this node.
    pub fn advertised(&self) -> (String, u16) {
        let addr = self.advertise_addr.as_deref().unwrap_or(&self.bind_addr);
        match addr.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(7410)),
            None => (addr.to_string(), 7410),
        }
    }

    /// Whether a joining node with these tags is auto-approved.
    pub fn auto_approves(&self, tags: &std::collections::BTreeSet<String>) -> bool {
        if self.auto_approve_ephemeral && tags.contains(crate::node::EPHEMERAL_TAG) {
            return true;
        }
        self.auto_approve_tags.iter().any(|t| tags.contains(t))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
