// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for crash recovery and follower catch-up.
//!
//! Snapshots store the complete cluster state at a point in time,
//! identified by the last applied log index. Recovery loads the snapshot
//! and resumes the apply bus after that index; a follower behind the
//! leader's log-compaction horizon receives the same bytes over the wire.
//!
//! On-disk format: zstd-compressed JSON, written via temp-file rename,
//! with up to three rotated `.bak` copies.

use crate::machine::ClusterState;
use chrono::{DateTime, Utc};
use mesh_core::entry::LogIndex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current snapshot schema version
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;
const MAX_BAK_FILES: u32 = 3;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot version {found} not supported (current: {current})")]
    Version { found: u32, current: u32 },
}

/// A snapshot of the cluster state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version
    #[serde(rename = "v")]
    pub version: u32,
    /// Last applied log index at the time of snapshot
    pub seq: LogIndex,
    /// Term of that entry (consensus resumes its log at this boundary)
    #[serde(default)]
    pub term: u64,
    /// The complete materialized state
    pub state: ClusterState,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn of(state: &ClusterState) -> Self {
        Self {
            version: CURRENT_SNAPSHOT_VERSION,
            seq: state.last_applied,
            term: 0,
            state: state.clone(),
            created_at: Utc::now(),
        }
    }

    /// Record the term of the boundary entry (known to the apply driver).
    pub fn with_term(mut self, term: u64) -> Self {
        self.term = term;
        self
    }

    /// Serialized wire/disk form (zstd-compressed JSON).
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        let json = serde_json::to_vec(self)?;
        Ok(zstd::encode_all(json.as_slice(), ZSTD_LEVEL)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let json = zstd::decode_all(bytes)?;
        let snapshot: Snapshot = serde_json::from_slice(&json)?;
        if snapshot.version != CURRENT_SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                found: snapshot.version,
                current: CURRENT_SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }

    /// Write atomically, rotating the previous file into the `.bak` chain.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let bytes = self.to_bytes()?;
        if path.exists() {
            let _ = fs::rename(path, rotate_bak_path(path));
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Load the snapshot if one exists.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(Snapshot::from_bytes(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
