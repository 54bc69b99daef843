//! # Sync Module
//!
//! Bidirectional synchronization between the local record store and the
//! todo server.
//!
//! ## Overview
//!
//! Each entity kind gets its own [`SyncOrchestrator`], driven by an
//! [`EntitySyncDriver`] that knows the entity's endpoint and repository:
//! - Fetching server records and reconciling them into the local store
//! - Pushing pending local changes in bounded batches
//! - Confirming accepted records and keeping rejected ones pending
//! - Running the cycle on a timer
//!
//! ## Components
//!
//! - **Batch** (`batch`): Batch partitioning and push summary parsing
//! - **Driver** (`driver`): Per-entity fetch/push against the transport and repository
//! - **Session** (`session`): Bookkeeping for the single active sync cycle
//! - **Orchestrator** (`orchestrator`): The sync state machine and auto-sync timer

pub mod batch;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod session;

pub use batch::{partition, ItemConflict, ItemError, PushSummary};
pub use driver::{
    CategorySyncDriver, EntitySyncDriver, PendingRecord, RequestSettings, TodoSyncDriver,
};
pub use error::{Result, SyncError};
pub use orchestrator::{
    OrchestratorSettings, SyncOrchestrator, SyncOrchestratorBuilder, SyncOutcome,
};
pub use session::{SessionSnapshot, SessionState, SyncPhase};
