// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon file layout under the state directory.

use mesh_core::config::{ClusterConfig, ConfigError};
use std::path::{Path, PathBuf};

/// Everything `meshd` keeps on disk, rooted at `data_dir`.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub data_dir: PathBuf,
    /// Exclusive-lock/PID file
    pub lock_path: PathBuf,
    /// Binary version marker, for operators checking rolling updates
    pub version_path: PathBuf,
    /// Daemon log file
    pub log_path: PathBuf,
    /// Durable consensus metadata (term, voted_for)
    pub meta_path: PathBuf,
    /// State-machine snapshot
    pub snapshot_path: PathBuf,
    /// Incoming binary staged by a rolling update
    pub staged_binary_path: PathBuf,
    /// Backup of the previous binary, for rollback
    pub backup_binary_path: PathBuf,
    /// Plugin-owned data directory
    pub plugin_data_dir: PathBuf,
}

impl DaemonPaths {
    pub fn under(data_dir: PathBuf) -> Self {
        Self {
            lock_path: data_dir.join("meshd.pid"),
            version_path: data_dir.join("meshd.version"),
            log_path: data_dir.join("meshd.log"),
            meta_path: data_dir.join("meta.json"),
            snapshot_path: data_dir.join("snapshot.json.zst"),
            staged_binary_path: data_dir.join("update.bin"),
            backup_binary_path: data_dir.join("meshd.bin.bak"),
            plugin_data_dir: data_dir.join("plugins"),
            data_dir,
        }
    }

    /// Resolve from config, defaulting to `~/.local/state/mesh`.
    pub fn resolve(config: &ClusterConfig) -> Self {
        let data_dir = config.data_dir.clone().unwrap_or_else(|| {
            dirs::state_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("mesh")
        });
        Self::under(data_dir)
    }
}

/// Load the cluster config for startup; a missing `--config` means
/// defaults (single-node bootstrap).
pub fn load(config_path: Option<&Path>) -> Result<ClusterConfig, ConfigError> {
    match config_path {
        Some(path) => ClusterConfig::from_toml_file(path),
        None => Ok(ClusterConfig::default()),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
