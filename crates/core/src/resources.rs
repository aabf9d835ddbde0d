// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node resource snapshots.
//!
//! Snapshots arrive at the join/heartbeat boundary and are normalized there:
//! memory and disk figures are always bytes once they enter the replicated
//! state, regardless of whether the reporting node sent raw byte counts or
//! `Ki`/`Mi`/`Gi` strings.

use serde::{Deserialize, Serialize};

/// One physical GPU on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    /// Vendor model string, e.g. "NVIDIA GeForce RTX 4090"
    pub model: String,
    /// Dedicated memory in bytes
    pub memory_bytes: u64,
    /// False while another workload holds the device
    pub available: bool,
}

/// Point-in-time view of a node's capacity, refreshed by heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_cores: u32,
    pub mem_total_bytes: u64,
    pub mem_available_bytes: u64,
    #[serde(default)]
    pub gpus: Vec<GpuInfo>,
    pub disk_total_bytes: u64,
    pub disk_available_bytes: u64,
    /// Current CPU usage in percent, 0.0–100.0
    pub cpu_usage_pct: f64,
    /// True when an interactive workload is monopolizing the hardware;
    /// the scheduler keeps gpu-heavy work away while set.
    #[serde(default)]
    pub gaming_detected: bool,
}

impl ResourceSnapshot {
    /// True if this node currently has a free GPU.
    pub fn has_available_gpu(&self) -> bool {
        self.gpus.iter().any(|g| g.available)
    }
}

impl Default for ResourceSnapshot {
    fn default() -> Self {
        Self {
            cpu_cores: 1,
            mem_total_bytes: 0,
            mem_available_bytes: 0,
            gpus: Vec::new(),
            disk_total_bytes: 0,
            disk_available_bytes: 0,
            cpu_usage_pct: 0.0,
            gaming_detected: false,
        }
    }
}

/// Parse a memory/disk figure into bytes.
///
/// Accepts a bare byte count (`"1073741824"`) or a binary-suffixed string
/// (`"512Ki"`, `"256Mi"`, `"4Gi"`, optionally with a trailing `B`).
pub fn parse_mem_str(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(bytes) = s.parse::<u64>() {
        return Some(bytes);
    }
    let s = s.strip_suffix('B').unwrap_or(s);
    let (num, shift) = if let Some(n) = s.strip_suffix("Ki") {
        (n, 10)
    } else if let Some(n) = s.strip_suffix("Mi") {
        (n, 20)
    } else if let Some(n) = s.strip_suffix("Gi") {
        (n, 30)
    } else if let Some(n) = s.strip_suffix("Ti") {
        (n, 40)
    } else {
        return None;
    };
    let value: f64 = num.trim().parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * (1u64 << shift) as f64) as u64)
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod tests;
