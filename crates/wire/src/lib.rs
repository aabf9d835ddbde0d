// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mesh-wire: submitter ↔ leader protocol.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.
//! The same framing carries the peer-to-peer traffic; this crate owns the
//! codec and the client-facing request/response surface.

mod request;
mod response;
mod types;
mod wire;

pub use request::Request;
pub use response::Response;
pub use types::{
    JoinRequestEntry, NodeSummary, OutputChannel, TaskDetail, TaskEventEntry, TaskSummary,
    UpdateReport, WorkflowDetail, WorkflowSummary,
};
pub use wire::{decode, encode, read_message, write_message, ProtocolError, MAX_FRAME_BYTES};
