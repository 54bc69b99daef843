//! # Local Store Module
//!
//! Owns the offline-first todo database and the rules for merging remote
//! state into it.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - Todo and category repositories with per-record sync state
//! - Presentation queries with filtering, sorting and paging
//! - The JSON wire format used for export, import and sync
//! - Conflict resolution between local and incoming records

pub mod conflict;
pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod repositories;
pub mod wire;

pub use conflict::{evaluate, ConflictAction, ConflictPolicy, ImportSource};
pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::{
    Category, CategoryPatch, NewTodo, RecordVersion, SyncRecord, SyncState, Todo, TodoPatch,
    DEFAULT_CATEGORY,
};
pub use query::{StatusFilter, TodoQuery, TodoSort};
pub use repositories::{
    CategoryRepository, ImportSummary, SqliteCategoryRepository, SqliteTodoRepository,
    TodoRepository,
};
pub use wire::{CategoryWire, TodoWire};
