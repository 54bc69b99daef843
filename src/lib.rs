//! Workspace facade crate.
//!
//! Hosts depend on `todo-sync-workspace` and get the fully wired sync service
//! from `core-service` without naming each workspace crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
