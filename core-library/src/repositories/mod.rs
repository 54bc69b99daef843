//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations for the local store.
//!
//! ## Architecture
//!
//! - Traits define the interface the sync engine and UI consume
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//! - Every write that backs a sync-state transition runs in one transaction
//!
//! ## Available Repositories
//!
//! - `TodoRepository` - Tasks with filtering, recycle bin and sync bookkeeping
//! - `CategoryRepository` - Uniquely named categories

pub mod category;
pub mod todo;

pub use category::{CategoryRepository, SqliteCategoryRepository};
pub use todo::{SqliteTodoRepository, TodoRepository};

use crate::error::Result;
use crate::models::{to_millis, RecordVersion, SyncState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// Counts reported by an import pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }

    /// Whether the import changed anything locally.
    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

/// Applies one upload acknowledgment to `table`, but only if the row is
/// still at the pushed version. A confirmed delete removes the row; anything
/// else becomes `Synced`. Returns whether the row changed.
pub(crate) async fn confirm_version(
    conn: &mut SqliteConnection,
    table: &str,
    version: &RecordVersion,
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = if version.state == SyncState::PendingDelete {
        format!("DELETE FROM {table} WHERE uuid = ? AND synced = ? AND updated_at = ?")
    } else {
        format!(
            "UPDATE {table} SET synced = {}, updated_at = ? \
             WHERE uuid = ? AND synced = ? AND updated_at = ?",
            SyncState::Synced.as_i64()
        )
    };

    let mut statement = sqlx::query(&query);
    if version.state != SyncState::PendingDelete {
        statement = statement.bind(to_millis(now));
    }
    let result = statement
        .bind(version.uuid.to_string())
        .bind(version.state.as_i64())
        .bind(to_millis(version.updated_at))
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
