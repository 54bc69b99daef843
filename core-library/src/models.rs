//! Domain models for the local store
//!
//! Records (todos and categories), their per-record sync flag, and the
//! insert/patch value types used by the repositories.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::fmt;
use uuid::Uuid;

/// Category assigned to todos created without one.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

// =============================================================================
// Sync State
// =============================================================================

/// Per-record sync flag, stored as an integer.
///
/// Only a confirmed server acknowledgment resets a record to `Synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    Synced = 0,
    PendingInsert = 1,
    PendingUpdate = 2,
    PendingDelete = 3,
}

impl SyncState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(SyncState::Synced),
            1 => Some(SyncState::PendingInsert),
            2 => Some(SyncState::PendingUpdate),
            3 => Some(SyncState::PendingDelete),
            _ => None,
        }
    }

    pub fn is_pending(self) -> bool {
        self != SyncState::Synced
    }

    /// State after a local edit: a record the server has never seen stays a
    /// pending insert.
    pub fn after_local_edit(self) -> Self {
        match self {
            SyncState::PendingInsert => SyncState::PendingInsert,
            _ => SyncState::PendingUpdate,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Synced => write!(f, "synced"),
            SyncState::PendingInsert => write!(f, "pending insert"),
            SyncState::PendingUpdate => write!(f, "pending update"),
            SyncState::PendingDelete => write!(f, "pending delete"),
        }
    }
}

/// What the sync layer needs to know about any record.
pub trait SyncRecord {
    fn uuid(&self) -> Uuid;
    fn updated_at(&self) -> DateTime<Utc>;
    fn sync_state(&self) -> SyncState;

    fn version(&self) -> RecordVersion {
        RecordVersion {
            uuid: self.uuid(),
            updated_at: self.updated_at(),
            state: self.sync_state(),
        }
    }
}

/// The exact local version of a record that went out in a push.
///
/// An acknowledgment only applies while the row still carries this
/// `updated_at` and sync state; a row edited after it was read stays pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordVersion {
    pub uuid: Uuid,
    pub updated_at: DateTime<Utc>,
    pub state: SyncState,
}

// =============================================================================
// Timestamp helpers
// =============================================================================

/// Stored representation of a timestamp (UTC milliseconds).
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Truncates to millisecond precision, the precision the store keeps.
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(to_millis(ts)).unwrap_or(ts)
}

/// `updated_at` for a local edit: the clock, but always past the previous
/// value so two edits never share a version.
pub fn next_edit_time(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = truncate_millis(now);
    if now > previous {
        now
    } else {
        previous + chrono::Duration::milliseconds(1)
    }
}

fn corrupted(table: &str, message: impl Into<String>) -> sqlx::Error {
    sqlx::Error::Decode(
        format!("{}: {}", table, message.into()).into(),
    )
}

fn uuid_column(row: &SqliteRow, table: &str, column: &str) -> Result<Uuid, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| corrupted(table, format!("{} '{}': {}", column, raw, e)))
}

fn ts_column(row: &SqliteRow, table: &str, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let ms: i64 = row.try_get(column)?;
    from_millis(ms).ok_or_else(|| corrupted(table, format!("{} out of range", column)))
}

fn opt_ts_column(
    row: &SqliteRow,
    table: &str,
    column: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let ms: Option<i64> = row.try_get(column)?;
    ms.map(|ms| from_millis(ms).ok_or_else(|| corrupted(table, format!("{} out of range", column))))
        .transpose()
}

fn sync_column(row: &SqliteRow, table: &str) -> Result<SyncState, sqlx::Error> {
    let raw: i64 = row.try_get("synced")?;
    SyncState::from_i64(raw).ok_or_else(|| corrupted(table, format!("synced = {}", raw)))
}

// =============================================================================
// Todo
// =============================================================================

/// A task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    /// Local row id; never sent to the server.
    pub id: i64,
    pub uuid: Uuid,
    pub user_uuid: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub important: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub recurrence_interval: i32,
    pub recurrence_count: i32,
    pub recurrence_start_date: Option<NaiveDate>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced: SyncState,
}

impl Todo {
    /// Same domain content, ignoring the local row id and the sync flag.
    pub fn same_fields(&self, other: &Todo) -> bool {
        self.uuid == other.uuid
            && self.user_uuid == other.user_uuid
            && self.title == other.title
            && self.description == other.description
            && self.category == other.category
            && self.important == other.important
            && self.deadline == other.deadline
            && self.recurrence_interval == other.recurrence_interval
            && self.recurrence_count == other.recurrence_count
            && self.recurrence_start_date == other.recurrence_start_date
            && self.is_completed == other.is_completed
            && self.completed_at == other.completed_at
            && self.is_deleted == other.is_deleted
            && self.deleted_at == other.deleted_at
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
    }
}

impl SyncRecord for Todo {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn sync_state(&self) -> SyncState {
        self.synced
    }
}

impl<'r> FromRow<'r, SqliteRow> for Todo {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        const T: &str = "todos";
        let recurrence_start_date: Option<String> = row.try_get("recurrence_start_date")?;
        let recurrence_start_date = recurrence_start_date
            .filter(|s| !s.is_empty())
            .map(|s| {
                NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map_err(|e| corrupted(T, format!("recurrence_start_date '{}': {}", s, e)))
            })
            .transpose()?;

        Ok(Self {
            id: row.try_get("id")?,
            uuid: uuid_column(row, T, "uuid")?,
            user_uuid: uuid_column(row, T, "user_uuid")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            important: row.try_get("important")?,
            deadline: opt_ts_column(row, T, "deadline")?,
            recurrence_interval: row.try_get("recurrence_interval")?,
            recurrence_count: row.try_get("recurrence_count")?,
            recurrence_start_date,
            is_completed: row.try_get("is_completed")?,
            completed_at: opt_ts_column(row, T, "completed_at")?,
            is_deleted: row.try_get("is_deleted")?,
            deleted_at: opt_ts_column(row, T, "deleted_at")?,
            created_at: ts_column(row, T, "created_at")?,
            updated_at: ts_column(row, T, "updated_at")?,
            synced: sync_column(row, T)?,
        })
    }
}

/// Fields for a locally created todo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodo {
    pub user_uuid: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub important: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub recurrence_interval: i32,
    pub recurrence_count: i32,
    pub recurrence_start_date: Option<NaiveDate>,
}

impl NewTodo {
    pub fn new(user_uuid: Uuid, title: impl Into<String>) -> Self {
        Self {
            user_uuid,
            title: title.into(),
            description: String::new(),
            category: DEFAULT_CATEGORY.to_string(),
            important: false,
            deadline: None,
            recurrence_interval: 0,
            recurrence_count: 0,
            recurrence_start_date: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn important(mut self, important: bool) -> Self {
        self.important = important;
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn recurrence(mut self, interval: i32, count: i32, start: Option<NaiveDate>) -> Self {
        self.recurrence_interval = interval;
        self.recurrence_count = count;
        self.recurrence_start_date = start;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Todo title cannot be empty".to_string());
        }
        if self.recurrence_interval < 0 || self.recurrence_count < 0 {
            return Err("Recurrence values cannot be negative".to_string());
        }
        Ok(())
    }
}

/// Partial update of a todo: only `Some` fields are written.
///
/// Nullable columns use `Option<Option<_>>`: `Some(None)` clears the value.
///
/// ```
/// use core_library::models::TodoPatch;
///
/// let patch = TodoPatch::new().title("Buy milk").important(true).clear_deadline();
/// assert!(!patch.is_empty());
/// assert_eq!(patch.deadline, Some(None));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub important: Option<bool>,
    pub deadline: Option<Option<DateTime<Utc>>>,
    pub recurrence_interval: Option<i32>,
    pub recurrence_count: Option<i32>,
    pub recurrence_start_date: Option<Option<NaiveDate>>,
    pub is_completed: Option<bool>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub is_deleted: Option<bool>,
    pub deleted_at: Option<Option<DateTime<Utc>>>,
}

impl TodoPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn important(mut self, important: bool) -> Self {
        self.important = Some(important);
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(Some(deadline));
        self
    }

    pub fn clear_deadline(mut self) -> Self {
        self.deadline = Some(None);
        self
    }

    pub fn recurrence(mut self, interval: i32, count: i32, start: Option<NaiveDate>) -> Self {
        self.recurrence_interval = Some(interval);
        self.recurrence_count = Some(count);
        self.recurrence_start_date = Some(start);
        self
    }

    /// Marks completed at `at`, or reopens when `at` is `None`.
    pub fn completed(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.is_completed = Some(at.is_some());
        self.completed_at = Some(at);
        self
    }

    /// Moves to the recycle bin at `at`, or restores when `at` is `None`.
    pub fn trashed(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.is_deleted = Some(at.is_some());
        self.deleted_at = Some(at);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the present fields to `todo`.
    pub fn apply_to(&self, todo: &mut Todo) {
        if let Some(v) = &self.title {
            todo.title = v.clone();
        }
        if let Some(v) = &self.description {
            todo.description = v.clone();
        }
        if let Some(v) = &self.category {
            todo.category = v.clone();
        }
        if let Some(v) = self.important {
            todo.important = v;
        }
        if let Some(v) = self.deadline {
            todo.deadline = v;
        }
        if let Some(v) = self.recurrence_interval {
            todo.recurrence_interval = v;
        }
        if let Some(v) = self.recurrence_count {
            todo.recurrence_count = v;
        }
        if let Some(v) = self.recurrence_start_date {
            todo.recurrence_start_date = v;
        }
        if let Some(v) = self.is_completed {
            todo.is_completed = v;
        }
        if let Some(v) = self.completed_at {
            todo.completed_at = v;
        }
        if let Some(v) = self.is_deleted {
            todo.is_deleted = v;
        }
        if let Some(v) = self.deleted_at {
            todo.deleted_at = v;
        }
    }
}

// =============================================================================
// Category
// =============================================================================

/// A category record. Names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub uuid: Uuid,
    pub user_uuid: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced: SyncState,
}

impl Category {
    pub fn validate_name(name: &str) -> Result<(), String> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err("Category name cannot be empty".to_string());
        }
        if trimmed.chars().count() > 50 {
            return Err("Category name cannot exceed 50 characters".to_string());
        }
        Ok(())
    }
}

impl SyncRecord for Category {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn sync_state(&self) -> SyncState {
        self.synced
    }
}

impl<'r> FromRow<'r, SqliteRow> for Category {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        const T: &str = "categories";
        Ok(Self {
            id: row.try_get("id")?,
            uuid: uuid_column(row, T, "uuid")?,
            user_uuid: uuid_column(row, T, "user_uuid")?,
            name: row.try_get("name")?,
            created_at: ts_column(row, T, "created_at")?,
            updated_at: ts_column(row, T, "updated_at")?,
            synced: sync_column(row, T)?,
        })
    }
}

/// Partial update of a category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPatch {
    pub name: Option<String>,
}

impl CategoryPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}
