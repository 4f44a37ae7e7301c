// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Client state and statistics.
//!
//! # State Transitions
//!
//! ```text
//!   new()            shutdown()              worker drained
//! ────────▶ Running ───────────▶ ShuttingDown ──────────────▶ Stopped
//! ```
//!
//! - **Running**: accepting tasks, worker flushing batches.
//! - **ShuttingDown**: no new tasks; the worker finishes any in-flight
//!   exchange and sends what was already accepted once.
//! - **Stopped**: worker exited. Safe to drop.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// State of a [`PeerNodeClient`](super::PeerNodeClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Running => write!(f, "Running"),
            NodeState::ShuttingDown => write!(f, "ShuttingDown"),
            NodeState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Counters shared between a client and its worker.
#[derive(Debug, Default)]
pub(crate) struct ReplicationStats {
    pub tasks_submitted: AtomicU64,
    pub tasks_superseded: AtomicU64,
    pub batches_sent: AtomicU64,
    pub singles_sent: AtomicU64,
    pub tasks_finished: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_expired: AtomicU64,
    pub tasks_discarded: AtomicU64,
    pub self_heals: AtomicU64,
    pub adoptions: AtomicU64,
    pub consecutive_network_failures: AtomicU32,
}

impl ReplicationStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_superseded: self.tasks_superseded.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            singles_sent: self.singles_sent.load(Ordering::Relaxed),
            tasks_finished: self.tasks_finished.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_expired: self.tasks_expired.load(Ordering::Relaxed),
            tasks_discarded: self.tasks_discarded.load(Ordering::Relaxed),
            self_heals: self.self_heals.load(Ordering::Relaxed),
            adoptions: self.adoptions.load(Ordering::Relaxed),
            consecutive_network_failures: self.consecutive_network_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a client's counters.
///
/// `tasks_failed` includes expired tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_superseded: u64,
    pub batches_sent: u64,
    pub singles_sent: u64,
    pub tasks_finished: u64,
    pub tasks_failed: u64,
    pub tasks_expired: u64,
    pub tasks_discarded: u64,
    pub self_heals: u64,
    pub adoptions: u64,
    pub consecutive_network_failures: u32,
}
