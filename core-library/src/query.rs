//! Filtered and sorted todo id queries for the presentation layer.
//!
//! The sync engine never uses these; they exist so list views can page
//! through the store without loading every record.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::models::SyncState;

/// Completion/recycle-bin filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StatusFilter {
    /// Everything outside the recycle bin.
    #[default]
    Active,
    /// Open items outside the recycle bin.
    Todo,
    /// Completed items outside the recycle bin.
    Done,
    /// Items in the recycle bin.
    Recycle,
    /// No status restriction.
    All,
}

/// Sort key for [`TodoQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TodoSort {
    CreatedAt,
    /// Items without a deadline sort last.
    Deadline,
    /// Important items first, newest first within each group.
    Importance,
    /// Case-insensitive.
    Title,
    #[default]
    UpdatedAt,
    /// Open items sort last.
    CompletedAt,
}

/// Filter, sort and paging options for `query_ids`.
///
/// ```
/// use core_library::query::{StatusFilter, TodoQuery, TodoSort};
///
/// let query = TodoQuery::new()
///     .category("Work")
///     .status(StatusFilter::Todo)
///     .sort(TodoSort::Deadline, false)
///     .limit(20);
/// assert_eq!(query.limit, Some(20));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TodoQuery {
    pub category: Option<String>,
    pub status: StatusFilter,
    pub search: Option<String>,
    /// Inclusive deadline date window; either side may be open.
    pub deadline_from: Option<NaiveDate>,
    pub deadline_to: Option<NaiveDate>,
    pub sort: TodoSort,
    pub descending: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl TodoQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn deadline_between(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.deadline_from = from;
        self.deadline_to = to;
        self
    }

    pub fn sort(mut self, sort: TodoSort, descending: bool) -> Self {
        self.sort = sort;
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BindValue {
    Text(String),
    I64(i64),
}

#[derive(Debug, Clone)]
pub(crate) struct QuerySpec {
    pub(crate) sql: String,
    pub(crate) binds: Vec<BindValue>,
}

pub(crate) fn build_todo_id_query(query: &TodoQuery) -> QuerySpec {
    let mut conditions = vec!["synced != ?"];
    let mut binds = vec![BindValue::I64(SyncState::PendingDelete.as_i64())];

    if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
        conditions.push("category = ?");
        binds.push(BindValue::Text(category.to_string()));
    }

    match query.status {
        StatusFilter::Active => conditions.push("is_deleted = 0"),
        StatusFilter::Todo => conditions.push("is_deleted = 0 AND is_completed = 0"),
        StatusFilter::Done => conditions.push("is_deleted = 0 AND is_completed = 1"),
        StatusFilter::Recycle => conditions.push("is_deleted = 1"),
        StatusFilter::All => {}
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        conditions.push("(title LIKE ? OR description LIKE ? OR category LIKE ?)");
        for _ in 0..3 {
            binds.push(BindValue::Text(pattern.clone()));
        }
    }

    if let Some(from) = query.deadline_from {
        conditions.push("deadline >= ?");
        binds.push(BindValue::I64(day_start_millis(from)));
    }
    if let Some(to) = query.deadline_to {
        // End of the window is exclusive: midnight after the last day.
        conditions.push("deadline < ?");
        binds.push(BindValue::I64(day_start_millis(to + Duration::days(1))));
    }

    let mut sql = String::from("SELECT id FROM todos WHERE ");
    sql.push_str(&conditions.join(" AND "));
    sql.push(' ');
    sql.push_str(&order_clause(query.sort, query.descending));

    if let Some(limit) = query.limit.filter(|l| *l > 0) {
        sql.push_str(" LIMIT ?");
        binds.push(BindValue::I64(limit as i64));
        if let Some(offset) = query.offset.filter(|o| *o > 0) {
            sql.push_str(" OFFSET ?");
            binds.push(BindValue::I64(offset as i64));
        }
    }

    QuerySpec { sql, binds }
}

fn order_clause(sort: TodoSort, descending: bool) -> String {
    let dir = if descending { "DESC" } else { "ASC" };
    match sort {
        TodoSort::CreatedAt => format!("ORDER BY created_at {dir}, id {dir}"),
        TodoSort::Deadline => format!("ORDER BY (deadline IS NULL) ASC, deadline {dir}, id {dir}"),
        // Descending flips the importance groups only; newest stays first.
        TodoSort::Importance if descending => {
            "ORDER BY important ASC, created_at DESC, id DESC".to_string()
        }
        TodoSort::Importance => "ORDER BY important DESC, created_at DESC, id DESC".to_string(),
        TodoSort::Title => format!("ORDER BY title COLLATE NOCASE {dir}, id {dir}"),
        TodoSort::UpdatedAt => format!("ORDER BY updated_at {dir}, id {dir}"),
        TodoSort::CompletedAt => {
            format!("ORDER BY (completed_at IS NULL) ASC, completed_at {dir}, id {dir}")
        }
    }
}

fn day_start_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query_hides_pending_deletes_and_trash() {
        let spec = build_todo_id_query(&TodoQuery::new());
        assert!(spec.sql.starts_with("SELECT id FROM todos WHERE synced != ? AND is_deleted = 0"));
        assert!(spec.sql.ends_with("ORDER BY updated_at ASC, id ASC"));
        assert_eq!(spec.binds, vec![BindValue::I64(3)]);
    }

    #[test]
    fn test_search_binds_all_three_columns() {
        let spec = build_todo_id_query(&TodoQuery::new().search("milk"));
        let patterns = spec
            .binds
            .iter()
            .filter(|b| **b == BindValue::Text("%milk%".to_string()))
            .count();
        assert_eq!(patterns, 3);
    }

    #[test]
    fn test_deadline_window_is_half_open() {
        let from = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let spec = build_todo_id_query(&TodoQuery::new().deadline_between(Some(from), Some(to)));

        assert!(spec.sql.contains("deadline >= ? AND deadline < ?"));
        assert_eq!(spec.binds[1], BindValue::I64(day_start_millis(from)));
        assert_eq!(
            spec.binds[2],
            BindValue::I64(day_start_millis(from) + 2 * 86_400_000)
        );
    }

    #[test]
    fn test_limit_and_offset() {
        let spec = build_todo_id_query(&TodoQuery::new().limit(10).offset(20));
        assert!(spec.sql.ends_with("LIMIT ? OFFSET ?"));

        let spec = build_todo_id_query(&TodoQuery::new().offset(20));
        assert!(!spec.sql.contains("OFFSET"));
    }

    #[test]
    fn test_importance_order_flip() {
        assert_eq!(
            order_clause(TodoSort::Importance, true),
            "ORDER BY important ASC, created_at DESC, id DESC"
        );
        assert!(order_clause(TodoSort::Deadline, true).starts_with("ORDER BY (deadline IS NULL) ASC"));
    }
}
