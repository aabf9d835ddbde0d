// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary staging, swapping, and rollback on the receiving side.

use crate::transport::{PeerMessage, PeerPool};
use mesh_core::NodeId;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

pub fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Replace the running binary's file with the staged one, keeping a
/// backup for rollback. The running process keeps its mapped image; the
/// swap takes effect on restart.
pub fn swap_in(staged: &PathBuf, backup: &PathBuf) -> std::io::Result<()> {
    let target = std::env::current_exe()?;
    fs::copy(&target, backup)?;
    fs::rename(staged, &target)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Restore the pre-update binary.
pub fn roll_back(backup: &PathBuf) -> std::io::Result<()> {
    let target = std::env::current_exe()?;
    fs::rename(backup, &target)?;
    Ok(())
}

/// Re-exec the current binary with the original arguments. Only returns
/// on failure.
pub fn restart_process() -> std::io::Error {
    let target = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => return e,
    };
    let args: Vec<String> = std::env::args().skip(1).collect();
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std::process::Command::new(target).args(args).exec()
    }
    #[cfg(not(unix))]
    {
        std::io::Error::new(std::io::ErrorKind::Unsupported, "restart requires unix")
    }
}

struct StagedTransfer {
    nonce: u64,
    file: fs::File,
    hasher: Sha256,
    next_seq: u32,
}

/// Follower-side handler for the updater service messages.
pub struct UpdateReceiver {
    peers: PeerPool,
    staged_path: PathBuf,
    backup_path: PathBuf,
    transfer: Mutex<Option<StagedTransfer>>,
}

impl UpdateReceiver {
    pub fn new(peers: PeerPool, staged_path: PathBuf, backup_path: PathBuf) -> Self {
        Self { peers, staged_path, backup_path, transfer: Mutex::new(None) }
    }

    /// Handle one updater-service message; replies go back to `from`.
    pub fn handle(&self, from: NodeId, msg: PeerMessage) {
        match msg {
            PeerMessage::Probe { nonce } => {
                self.peers.send(&from, PeerMessage::ProbeAck { nonce });
            }
            PeerMessage::PushBinary { nonce, seq, bytes, last } => {
                match self.accept_chunk(nonce, seq, &bytes, last) {
                    Ok(Some(digest)) => {
                        info!(%digest, "binary staged");
                        self.peers.send(&from, PeerMessage::PushBinaryAck { nonce, digest });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "binary chunk rejected");
                        // A garbage ack digest makes the leader abort.
                        if last {
                            self.peers.send(
                                &from,
                                PeerMessage::PushBinaryAck { nonce, digest: String::new() },
                            );
                        }
                    }
                }
            }
            PeerMessage::ActivateBinary { nonce, digest } => {
                let ok = self.activate(&digest);
                self.peers.send(&from, PeerMessage::ActivateAck { nonce, ok });
                if ok {
                    info!("activated new binary, restarting");
                    tokio::spawn(async {
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        let e = restart_process();
                        warn!(error = %e, "restart after activation failed");
                    });
                }
            }
            PeerMessage::RollbackBinary { nonce } => {
                let restored = roll_back(&self.backup_path);
                self.peers.send(&from, PeerMessage::RollbackAck { nonce });
                match restored {
                    Ok(()) => {
                        info!("rolled back to previous binary, restarting");
                        tokio::spawn(async {
                            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                            let e = restart_process();
                            warn!(error = %e, "restart after rollback failed");
                        });
                    }
                    Err(e) => warn!(error = %e, "rollback failed"),
                }
            }
            _ => {}
        }
    }

    /// Append a chunk to the staging file. Returns the digest once the
    /// final chunk lands.
    fn accept_chunk(
        &self,
        nonce: u64,
        seq: u32,
        bytes: &[u8],
        last: bool,
    ) -> std::io::Result<Option<String>> {
        let mut guard = self.transfer.lock();

        // New transfer (or a retry restarting from zero).
        if seq == 0 {
            let file = fs::File::create(&self.staged_path)?;
            *guard = Some(StagedTransfer { nonce, file, hasher: Sha256::new(), next_seq: 0 });
        }
        let Some(transfer) = guard.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "chunk without a transfer in progress",
            ));
        };
        if transfer.nonce != nonce || transfer.next_seq != seq {
            *guard = None;
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "out-of-order binary chunk",
            ));
        }
        transfer.file.write_all(bytes)?;
        transfer.hasher.update(bytes);
        transfer.next_seq += 1;

        if !last {
            return Ok(None);
        }
        transfer.file.sync_all()?;
        let digest = format!("{:x}", transfer.hasher.clone().finalize());
        *guard = None;
        Ok(Some(digest))
    }

    fn activate(&self, expected_digest: &str) -> bool {
        let staged = match fs::read(&self.staged_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "no staged binary to activate");
                return false;
            }
        };
        if digest_hex(&staged) != expected_digest {
            warn!("staged binary digest mismatch");
            return false;
        }
        match swap_in(&self.staged_path, &self.backup_path) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "binary swap failed");
                false
            }
        }
    }
}
