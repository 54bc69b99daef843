//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every sync crate:
//! - Configuration ([`config::CoreConfig`])
//! - Event bus and the shared sync vocabulary ([`events`])
//! - Logging and tracing bootstrap ([`logging`])
//!
//! ## Overview
//!
//! Nothing here talks to the network or the database. Other crates depend on
//! this one for the types they exchange (entity kinds, sync results, events)
//! and for the single place where defaults such as the 10 second request
//! timeout or the 30 minute auto-sync interval are decided.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder};
pub use error::{CoreError, Result};
pub use events::{
    AuthEvent, CoreEvent, EntityKind, EventBus, EventStream, SyncDirection, SyncEvent, SyncResult,
};
