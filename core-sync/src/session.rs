//! # Sync Session
//!
//! Transient bookkeeping for one running sync cycle.
//!
//! ```text
//! Idle ──start──▶ Syncing(direction) ──complete/cancel/error──▶ Idle
//! ```
//!
//! A session exists only while a cycle runs; nothing here is persisted.

use core_runtime::events::SyncDirection;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Phase of the running cycle, reported with progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Fetching,
    Pushing,
    Refetching,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Fetching => write!(f, "fetching"),
            SyncPhase::Pushing => write!(f, "pushing"),
            SyncPhase::Refetching => write!(f, "refetching"),
        }
    }
}

/// Orchestrator state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Syncing(SyncDirection),
}

/// The single active session of an orchestrator.
#[derive(Debug)]
pub(crate) struct SyncSession {
    pub(crate) id: u64,
    pub(crate) direction: SyncDirection,
    pub(crate) cancel: CancellationToken,
    pub(crate) phase: Option<SyncPhase>,
    pub(crate) pending_count: usize,
    pub(crate) current_batch: usize,
    pub(crate) total_batches: usize,
}

impl SyncSession {
    pub(crate) fn new(id: u64, direction: SyncDirection) -> Self {
        Self {
            id,
            direction,
            cancel: CancellationToken::new(),
            phase: None,
            pending_count: 0,
            current_batch: 0,
            total_batches: 0,
        }
    }

    /// Discards batch tracking once a push sequence ends.
    pub(crate) fn clear_batches(&mut self) {
        self.pending_count = 0;
        self.current_batch = 0;
        self.total_batches = 0;
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            direction: self.direction,
            phase: self.phase,
            pending_count: self.pending_count,
            current_batch: self.current_batch,
            total_batches: self.total_batches,
        }
    }
}

/// Read-only copy of a running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub direction: SyncDirection,
    pub phase: Option<SyncPhase>,
    pub pending_count: usize,
    pub current_batch: usize,
    pub total_batches: usize,
}
