// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable `(term, voted_for)` metadata.
//!
//! Raft safety requires these two fields to survive a crash: a node must
//! never vote twice in one term or regress its term. Every mutation is
//! written to a temp file and renamed over `meta.json`, then fsynced,
//! before the in-memory copy is trusted.

use mesh_core::entry::Term;
use mesh_core::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Latest term this node has seen (starts at 0).
    pub current_term: Term,
    /// Candidate this node voted for in `current_term`, if any.
    pub voted_for: Option<NodeId>,
}

pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load persisted metadata, or defaults when the file does not exist yet.
    pub fn load(&self) -> Result<Metadata, MetadataError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Metadata::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write-and-rename so a crash mid-write leaves the old file intact.
    pub fn save(&self, meta: &Metadata) -> Result<(), MetadataError> {
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(meta)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;
