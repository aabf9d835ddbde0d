// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mesh orchestrator daemon (meshd)
//!
//! One process per cluster member. Owns the consensus driver, the apply
//! bus, and (while leader) the scheduler, membership monitor, and
//! rolling updater.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use mesh_daemon::config::{self, DaemonPaths};
use mesh_daemon::lifecycle;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Rotate the daemon log at startup once it crosses this size.
const MAX_LOG_BYTES: u64 = 50 * 1024 * 1024;

fn usage() -> ! {
    eprintln!("Usage: meshd [--config <path>] [--help | --version]");
    std::process::exit(2);
}

fn parse_args() -> Option<PathBuf> {
    let mut config_path = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("meshd {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                println!("meshd {}", env!("CARGO_PKG_VERSION"));
                println!("Mesh orchestrator daemon - one process per cluster member");
                println!();
                println!("USAGE:");
                println!("    meshd [--config <path>]");
                println!();
                println!("OPTIONS:");
                println!("    --config <path>  Cluster config (TOML); defaults bootstrap a");
                println!("                     single-node cluster");
                println!("    -h, --help       Print help information");
                println!("    -V, --version    Print version information");
                std::process::exit(0);
            }
            "--config" => match args.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => usage(),
            },
            _ => usage(),
        }
    }
    config_path
}

fn rotate_log_if_needed(path: &std::path::Path) {
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.len() > MAX_LOG_BYTES {
            let _ = std::fs::rename(path, path.with_extension("log.1"));
        }
    }
}

fn setup_logging(paths: &DaemonPaths) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    rotate_log_if_needed(&paths.log_path);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mesh_raft=info"));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_path)
        .ok()?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let file_layer =
        tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking).boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() {
    let config_path = parse_args();

    // Exit code 2: configuration problems.
    let config = match config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("meshd: {e}");
            std::process::exit(2);
        }
    };
    let paths = DaemonPaths::resolve(&config);
    if let Err(e) = std::fs::create_dir_all(&paths.data_dir) {
        eprintln!("meshd: cannot create {}: {e}", paths.data_dir.display());
        std::process::exit(3);
    }

    let log_guard = setup_logging(&paths);
    info!(version = env!("CARGO_PKG_VERSION"), node = %config.node_id, "meshd starting");

    match lifecycle::run(config, paths).await {
        Ok(()) => {
            drop(log_guard);
            std::process::exit(0);
        }
        Err(e) => {
            error!("{e}");
            let code = e.exit_code();
            drop(log_guard);
            std::process::exit(code);
        }
    }
}
