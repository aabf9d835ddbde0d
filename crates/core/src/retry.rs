// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry policy and backoff arithmetic.

use serde::{Deserialize, Serialize};

/// How a task is retried after failure.
///
/// Backoff grows exponentially: the delay for the retry after failing at
/// attempt `n` is `backoff_ms * backoff_multiplier^n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, backoff_ms: 1000, backoff_multiplier: 2.0, retryable: true }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows a failure at `attempt`
    /// (0-based: first failure → 1× backoff).
    pub fn backoff_for(&self, attempt: u32) -> u64 {
        let factor = self.backoff_multiplier.powi(attempt.min(30) as i32);
        (self.backoff_ms as f64 * factor) as u64
    }

    /// Whether a task failing at `attempt` has a retry left.
    pub fn can_retry(&self, attempt: u32) -> bool {
        self.retryable && attempt < self.max_retries
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
