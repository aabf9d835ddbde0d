// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound side of the peer transport: accept loop and per-connection
//! readers, all funneling into one inbound frame queue.

use super::messages::PeerFrame;
use mesh_wire::{read_message, ProtocolError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Accept peer connections and pump their frames into `inbound`.
pub async fn serve_peers(listener: TcpListener, inbound: mpsc::Sender<PeerFrame>) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "peer transport listening"),
        Err(_) => info!("peer transport listening"),
    }
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "peer connected");
                tokio::spawn(read_frames(stream, inbound.clone()));
            }
            Err(e) => {
                warn!(error = %e, "peer accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn read_frames(mut stream: TcpStream, inbound: mpsc::Sender<PeerFrame>) {
    loop {
        match read_message::<PeerFrame, _>(&mut stream).await {
            Ok(frame) => {
                if inbound.send(frame).await.is_err() {
                    return; // daemon shutting down
                }
            }
            Err(ProtocolError::Closed) => return,
            Err(e) => {
                warn!(error = %e, "peer read failed, closing connection");
                return;
            }
        }
    }
}
