// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory replicated log with snapshot-based compaction.
//!
//! Indices are 1-based and global: compaction removes a prefix but never
//! renumbers. `snapshot_index`/`snapshot_term` describe the entry the
//! retained suffix starts after.

use mesh_core::entry::{LogEntry, LogIndex, Term};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct RaftLog {
    entries: VecDeque<LogEntry>,
    /// Index of the last entry folded into the snapshot (0 = none).
    snapshot_index: LogIndex,
    /// Term of that entry.
    snapshot_term: Term,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart from a snapshot boundary: the log is empty and begins
    /// after `(index, term)`.
    pub fn from_snapshot(index: LogIndex, term: Term) -> Self {
        Self { entries: VecDeque::new(), snapshot_index: index, snapshot_term: term }
    }

    pub fn snapshot_index(&self) -> LogIndex {
        self.snapshot_index
    }

    pub fn snapshot_term(&self) -> Term {
        self.snapshot_term
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries.back().map(|e| e.index).unwrap_or(self.snapshot_index)
    }

    pub fn last_term(&self) -> Term {
        self.entries.back().map(|e| e.term).unwrap_or(self.snapshot_term)
    }

    /// Term of the entry at `index`; `None` if compacted away or not present.
    /// Index 0 is the implicit empty-log sentinel with term 0.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        self.get(index).map(|e| e.term)
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        let first = self.snapshot_index + 1;
        if index < first {
            return None;
        }
        self.entries.get((index - first) as usize)
    }

    /// Append a leader-created entry; its index must be `last_index() + 1`.
    pub fn append(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.index, self.last_index() + 1, "log index gap");
        self.entries.push_back(entry);
    }

    /// Entries from `from` (inclusive) to the end, cloned for transmission.
    /// Returns `None` when `from` has been compacted away.
    pub fn suffix(&self, from: LogIndex) -> Option<Vec<LogEntry>> {
        if from <= self.snapshot_index {
            return None;
        }
        let first = self.snapshot_index + 1;
        let start = (from - first) as usize;
        if start > self.entries.len() {
            return Some(Vec::new());
        }
        Some(self.entries.iter().skip(start).cloned().collect())
    }

    /// Remove `index` and everything after it (conflict truncation).
    pub fn truncate_from(&mut self, index: LogIndex) {
        let first = self.snapshot_index + 1;
        if index < first {
            self.entries.clear();
            return;
        }
        self.entries.truncate((index - first) as usize);
    }

    /// Drop entries at or below `index` after they are folded into a snapshot.
    pub fn compact_to(&mut self, index: LogIndex) {
        if index <= self.snapshot_index {
            return;
        }
        let Some(term) = self.term_at(index) else {
            return;
        };
        while self.entries.front().map(|e| e.index <= index).unwrap_or(false) {
            self.entries.pop_front();
        }
        self.snapshot_index = index;
        self.snapshot_term = term;
    }

    /// Whether a candidate log at `(term, index)` is at least as up-to-date
    /// as ours (the voting check).
    pub fn up_to_date(&self, last_log_term: Term, last_log_index: LogIndex) -> bool {
        (last_log_term, last_log_index) >= (self.last_term(), self.last_index())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
