// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    bare_bytes = { "1073741824", 1_073_741_824 },
    kibi = { "512Ki", 512 * 1024 },
    mebi = { "256Mi", 256 * 1024 * 1024 },
    gibi = { "4Gi", 4 * 1024 * 1024 * 1024 },
    gibi_with_b = { "4GiB", 4 * 1024 * 1024 * 1024 },
    fractional = { "1.5Gi", 1_610_612_736 },
)]
fn parse_mem_accepts(input: &str, expected: u64) {
    assert_eq!(parse_mem_str(input), Some(expected));
}

#[parameterized(
    empty = { "" },
    garbage = { "lots" },
    negative = { "-1Gi" },
    decimal_suffix = { "4GB" },
)]
fn parse_mem_rejects(input: &str) {
    assert_eq!(parse_mem_str(input), None);
}

#[test]
fn has_available_gpu() {
    let mut snap = ResourceSnapshot::default();
    assert!(!snap.has_available_gpu());

    snap.gpus.push(GpuInfo {
        model: "NVIDIA RTX 4090".into(),
        memory_bytes: 24 * 1024 * 1024 * 1024,
        available: false,
    });
    assert!(!snap.has_available_gpu());

    snap.gpus[0].available = true;
    assert!(snap.has_available_gpu());
}
