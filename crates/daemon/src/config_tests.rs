// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write as _;

#[test]
fn paths_live_under_the_data_dir() {
    let paths = DaemonPaths::under(PathBuf::from("/var/lib/mesh"));
    assert_eq!(paths.lock_path, Path::new("/var/lib/mesh/meshd.pid"));
    assert_eq!(paths.meta_path, Path::new("/var/lib/mesh/meta.json"));
    assert_eq!(paths.snapshot_path, Path::new("/var/lib/mesh/snapshot.json.zst"));
    assert_eq!(paths.staged_binary_path, Path::new("/var/lib/mesh/update.bin"));
    assert_eq!(paths.plugin_data_dir, Path::new("/var/lib/mesh/plugins"));
}

#[test]
fn resolve_honors_configured_data_dir() {
    let config = ClusterConfig {
        data_dir: Some(PathBuf::from("/tmp/mesh-test")),
        ..ClusterConfig::default()
    };
    let paths = DaemonPaths::resolve(&config);
    assert_eq!(paths.data_dir, Path::new("/tmp/mesh-test"));
}

#[test]
fn missing_config_file_uses_single_node_defaults() {
    let config = load(None).unwrap();
    assert!(config.peers.is_empty());
    assert_eq!(config.node_id, "n1");
}

#[test]
fn config_file_errors_surface() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "not toml at all [").unwrap();
    assert!(load(Some(file.path())).is_err());
}
