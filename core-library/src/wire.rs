//! JSON wire format shared by export, import and the sync endpoints
//!
//! Outgoing records are serialized with serde. Incoming records go through
//! lenient, field-by-field parsing: the server and older backups are not
//! trusted to be well formed, and one bad item must not fail a whole import.

use crate::models::{
    truncate_millis, Category, SyncState, Todo, DEFAULT_CATEGORY,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Wire shape of a todo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoWire {
    pub uuid: Uuid,
    pub user_uuid: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub important: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub recurrence_interval: i32,
    pub recurrence_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_start_date: Option<NaiveDate>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced: i64,
}

impl From<&Todo> for TodoWire {
    fn from(todo: &Todo) -> Self {
        Self {
            uuid: todo.uuid,
            user_uuid: todo.user_uuid,
            title: todo.title.clone(),
            description: todo.description.clone(),
            category: todo.category.clone(),
            important: todo.important,
            deadline: todo.deadline,
            recurrence_interval: todo.recurrence_interval,
            recurrence_count: todo.recurrence_count,
            recurrence_start_date: todo.recurrence_start_date,
            is_completed: todo.is_completed,
            completed_at: todo.completed_at,
            is_deleted: todo.is_deleted,
            deleted_at: todo.deleted_at,
            created_at: todo.created_at,
            updated_at: todo.updated_at,
            synced: todo.synced.as_i64(),
        }
    }
}

/// Wire shape of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryWire {
    pub uuid: Uuid,
    pub user_uuid: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced: i64,
}

impl From<&Category> for CategoryWire {
    fn from(category: &Category) -> Self {
        Self {
            uuid: category.uuid,
            user_uuid: category.user_uuid,
            name: category.name.clone(),
            created_at: category.created_at,
            updated_at: category.updated_at,
            synced: category.synced.as_i64(),
        }
    }
}

pub fn todos_to_wire(todos: &[Todo]) -> Value {
    to_array(todos.iter().map(TodoWire::from))
}

pub fn categories_to_wire(categories: &[Category]) -> Value {
    to_array(categories.iter().map(CategoryWire::from))
}

fn to_array<T: Serialize>(items: impl Iterator<Item = T>) -> Value {
    Value::Array(
        items
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect(),
    )
}

// =============================================================================
// Lenient parsing
// =============================================================================

/// Why an incoming item was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NotAnObject,
    MissingField(&'static str),
    InvalidUserUuid,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotAnObject => write!(f, "item is not an object"),
            RejectReason::MissingField(field) => write!(f, "missing field '{}'", field),
            RejectReason::InvalidUserUuid => write!(f, "invalid user_uuid"),
        }
    }
}

/// Parses one incoming todo. The returned record has `id == 0` and its sync
/// flag is decided by the importer.
pub fn parse_todo(value: &Value, now: DateTime<Utc>) -> Result<Todo, RejectReason> {
    let obj = value.as_object().ok_or(RejectReason::NotAnObject)?;
    if !obj.contains_key("title") {
        return Err(RejectReason::MissingField("title"));
    }
    let user_uuid = user_uuid_field(obj)?;
    let (created_at, updated_at) = timestamps(obj, now);

    Ok(Todo {
        id: 0,
        uuid: uuid_or_fresh(obj),
        user_uuid,
        title: string_field(obj, "title").unwrap_or_default(),
        description: string_field(obj, "description").unwrap_or_default(),
        category: string_field(obj, "category")
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        important: bool_field(obj, "important"),
        deadline: datetime_field(obj, "deadline"),
        recurrence_interval: int_field(obj, "recurrence_interval"),
        recurrence_count: int_field(obj, "recurrence_count"),
        recurrence_start_date: date_field(obj, "recurrence_start_date"),
        is_completed: bool_field(obj, "is_completed"),
        completed_at: datetime_field(obj, "completed_at"),
        is_deleted: bool_field(obj, "is_deleted") || bool_field(obj, "is_trashed"),
        deleted_at: datetime_field(obj, "deleted_at").or_else(|| datetime_field(obj, "trashed_at")),
        created_at,
        updated_at,
        synced: SyncState::Synced,
    })
}

/// Parses one incoming category.
pub fn parse_category(value: &Value, now: DateTime<Utc>) -> Result<Category, RejectReason> {
    let obj = value.as_object().ok_or(RejectReason::NotAnObject)?;
    let name = string_field(obj, "name")
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or(RejectReason::MissingField("name"))?;
    let user_uuid = user_uuid_field(obj)?;
    let (created_at, updated_at) = timestamps(obj, now);

    Ok(Category {
        id: 0,
        uuid: uuid_or_fresh(obj),
        user_uuid,
        name,
        created_at,
        updated_at,
        synced: SyncState::Synced,
    })
}

fn user_uuid_field(obj: &Map<String, Value>) -> Result<Uuid, RejectReason> {
    let raw = obj
        .get("user_uuid")
        .ok_or(RejectReason::MissingField("user_uuid"))?;
    raw.as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .filter(|u| !u.is_nil())
        .ok_or(RejectReason::InvalidUserUuid)
}

fn uuid_or_fresh(obj: &Map<String, Value>) -> Uuid {
    obj.get("uuid")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .filter(|u| !u.is_nil())
        .unwrap_or_else(Uuid::new_v4)
}

fn timestamps(obj: &Map<String, Value>, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let created_at = datetime_field(obj, "created_at").unwrap_or_else(|| truncate_millis(now));
    let updated_at = datetime_field(obj, "updated_at").unwrap_or(created_at);
    (created_at, updated_at)
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        _ => false,
    }
}

fn int_field(obj: &Map<String, Value>, key: &str) -> i32 {
    obj.get(key)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(0)
}

fn datetime_field(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let raw = obj.get(key).and_then(Value::as_str)?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| truncate_millis(dt.with_timezone(&Utc)))
}

fn date_field(obj: &Map<String, Value>, key: &str) -> Option<NaiveDate> {
    let raw = obj.get(key).and_then(Value::as_str)?;
    // Accept both a bare date and a full timestamp.
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}
