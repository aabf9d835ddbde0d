// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine-readable error kinds surfaced across the client and peer
//! protocols. Handlers map internal failures onto these; the human-readable
//! message travels next to the kind, never inside it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request requires the leader; the response carries a leader hint.
    NotLeader,
    /// No quorum reachable; retry later.
    Unavailable,
    /// Missing or invalid field in the request.
    InvalidRequest,
    /// Placement impossible with the nodes currently known.
    NoEligibleNodes,
    /// Bounded wait elapsed.
    Timeout,
    /// State machine rejected the transition (e.g. cancelling a terminal
    /// task); idempotent and safe to treat as benign.
    Conflict,
    /// Bug or unexpected I/O failure.
    Internal,
}

crate::simple_display! {
    ErrorKind {
        NotLeader => "not_leader",
        Unavailable => "unavailable",
        InvalidRequest => "invalid_request",
        NoEligibleNodes => "no_eligible_nodes",
        Timeout => "timeout",
        Conflict => "conflict",
        Internal => "internal",
    }
}
