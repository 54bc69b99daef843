//! Todo repository trait and implementation

use crate::conflict::{evaluate, state_for_insert, state_for_overwrite, ConflictAction, ConflictPolicy, ImportSource};
use crate::error::{LibraryError, Result};
use crate::models::{
    next_edit_time, to_millis, truncate_millis, NewTodo, RecordVersion, SyncState, Todo, TodoPatch,
};
use crate::query::{build_todo_id_query, BindValue, TodoQuery};
use crate::repositories::{confirm_version, ImportSummary};
use crate::wire::{parse_todo, todos_to_wire};
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{query_as, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Todo repository interface for data access operations
#[async_trait]
pub trait TodoRepository: Send + Sync {
    /// All todos except those waiting for a confirmed deletion, in insertion order.
    async fn load_all(&self) -> Result<Vec<Todo>>;

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Todo>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Todo>>;

    /// Create a todo locally as a pending insert.
    ///
    /// # Errors
    /// Returns error if validation fails or a database error occurs
    async fn insert(&self, new: NewTodo) -> Result<Todo>;

    /// Apply a partial update.
    ///
    /// # Returns
    /// - `Ok(true)` if the todo was updated
    /// - `Ok(false)` if no live todo has this UUID
    async fn update(&self, uuid: Uuid, patch: &TodoPatch) -> Result<bool>;

    /// Move to the recycle bin.
    async fn trash(&self, uuid: Uuid) -> Result<bool>;

    /// Take out of the recycle bin.
    async fn restore(&self, uuid: Uuid) -> Result<bool>;

    /// Mark for deletion on the server. The row stays until the deletion
    /// is confirmed.
    async fn soft_delete(&self, uuid: Uuid) -> Result<bool>;

    /// Remove the row immediately.
    async fn hard_delete(&self, uuid: Uuid) -> Result<bool>;

    /// Row ids matching `query`, in the requested order.
    async fn query_ids(&self, query: &TodoQuery) -> Result<Vec<i64>>;

    /// Apply incoming wire records in a single transaction.
    async fn import_from_remote(
        &self,
        items: &[Value],
        source: ImportSource,
        policy: ConflictPolicy,
    ) -> Result<ImportSummary>;

    /// Wire array of every live todo.
    async fn export_all(&self) -> Result<Value>;

    /// Todos whose sync state is not `Synced`, in insertion order.
    async fn load_pending(&self) -> Result<Vec<Todo>>;

    /// Record a confirmed upload: pending deletes are removed, everything
    /// else becomes `Synced` with a refreshed `updated_at`. Rows edited
    /// since `versions` were read stay pending. Returns how many applied.
    async fn mark_synced(&self, versions: &[RecordVersion]) -> Result<u64>;

    /// Flag every row as a pending insert so it is uploaded again.
    async fn mark_all_pending(&self) -> Result<u64>;

    /// Move every row to another owner.
    async fn reassign_owner(&self, user_uuid: Uuid) -> Result<u64>;

    async fn delete_all(&self) -> Result<u64>;

    async fn count_pending(&self) -> Result<i64>;
}

/// SQLite implementation of TodoRepository
pub struct SqliteTodoRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteTodoRepository {
    /// Create a new SQLite todo repository
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        truncate_millis(self.clock.now())
    }

    async fn set_trashed(&self, uuid: Uuid, trashed: bool) -> Result<bool> {
        let at = trashed.then(|| self.now());
        self.update(uuid, &TodoPatch::new().trashed(at)).await
    }
}

const INSERT_SQL: &str = "INSERT INTO todos (uuid, user_uuid, title, description, category, important, \
    deadline, recurrence_interval, recurrence_count, recurrence_start_date, is_completed, completed_at, \
    is_deleted, deleted_at, created_at, updated_at, synced) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const UPDATE_SQL: &str = "UPDATE todos SET user_uuid = ?, title = ?, description = ?, category = ?, \
    important = ?, deadline = ?, recurrence_interval = ?, recurrence_count = ?, recurrence_start_date = ?, \
    is_completed = ?, completed_at = ?, is_deleted = ?, deleted_at = ?, created_at = ?, updated_at = ?, \
    synced = ? WHERE uuid = ?";

/// Binds every column except `id` and `uuid`, in [`UPDATE_SQL`] order.
macro_rules! bind_todo_columns {
    ($query:expr, $todo:expr) => {
        $query
            .bind($todo.user_uuid.to_string())
            .bind(&$todo.title)
            .bind(&$todo.description)
            .bind(&$todo.category)
            .bind($todo.important)
            .bind($todo.deadline.map(to_millis))
            .bind($todo.recurrence_interval)
            .bind($todo.recurrence_count)
            .bind(
                $todo
                    .recurrence_start_date
                    .map(|d| d.format("%Y-%m-%d").to_string()),
            )
            .bind($todo.is_completed)
            .bind($todo.completed_at.map(to_millis))
            .bind($todo.is_deleted)
            .bind($todo.deleted_at.map(to_millis))
            .bind(to_millis($todo.created_at))
            .bind(to_millis($todo.updated_at))
            .bind($todo.synced.as_i64())
    };
}

async fn insert_row(conn: &mut SqliteConnection, todo: &Todo) -> Result<i64> {
    let query = sqlx::query(INSERT_SQL).bind(todo.uuid.to_string());
    let result = bind_todo_columns!(query, todo).execute(&mut *conn).await?;
    Ok(result.last_insert_rowid())
}

async fn write_row(conn: &mut SqliteConnection, todo: &Todo) -> Result<bool> {
    let query = sqlx::query(UPDATE_SQL);
    let result = bind_todo_columns!(query, todo)
        .bind(todo.uuid.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

async fn fetch_by_uuid(conn: &mut SqliteConnection, uuid: Uuid) -> Result<Option<Todo>> {
    let todo = query_as::<_, Todo>("SELECT * FROM todos WHERE uuid = ?")
        .bind(uuid.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(todo)
}

fn validate_patch(patch: &TodoPatch) -> Result<()> {
    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return Err(LibraryError::invalid("title", "Todo title cannot be empty"));
        }
    }
    if patch.recurrence_interval.is_some_and(|v| v < 0)
        || patch.recurrence_count.is_some_and(|v| v < 0)
    {
        return Err(LibraryError::invalid(
            "recurrence",
            "Recurrence values cannot be negative",
        ));
    }
    Ok(())
}

#[async_trait]
impl TodoRepository for SqliteTodoRepository {
    async fn load_all(&self) -> Result<Vec<Todo>> {
        let todos = query_as::<_, Todo>("SELECT * FROM todos WHERE synced != ? ORDER BY id")
            .bind(SyncState::PendingDelete.as_i64())
            .fetch_all(&self.pool)
            .await?;
        Ok(todos)
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Todo>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_uuid(&mut conn, uuid).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Todo>> {
        let todo = query_as::<_, Todo>("SELECT * FROM todos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(todo)
    }

    #[instrument(skip(self, new), fields(title = %new.title))]
    async fn insert(&self, new: NewTodo) -> Result<Todo> {
        new.validate()
            .map_err(|msg| LibraryError::invalid("todo", msg))?;

        let now = self.now();
        let mut todo = Todo {
            id: 0,
            uuid: Uuid::new_v4(),
            user_uuid: new.user_uuid,
            title: new.title,
            description: new.description,
            category: new.category,
            important: new.important,
            deadline: new.deadline.map(truncate_millis),
            recurrence_interval: new.recurrence_interval,
            recurrence_count: new.recurrence_count,
            recurrence_start_date: new.recurrence_start_date,
            is_completed: false,
            completed_at: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            synced: SyncState::PendingInsert,
        };

        let mut conn = self.pool.acquire().await?;
        todo.id = insert_row(&mut conn, &todo).await?;
        debug!(uuid = %todo.uuid, "Inserted todo");
        Ok(todo)
    }

    #[instrument(skip(self, patch), fields(uuid = %uuid))]
    async fn update(&self, uuid: Uuid, patch: &TodoPatch) -> Result<bool> {
        validate_patch(patch)?;

        let mut tx = self.pool.begin().await?;
        let Some(mut todo) = fetch_by_uuid(&mut tx, uuid).await? else {
            return Ok(false);
        };
        if todo.synced == SyncState::PendingDelete {
            debug!("Ignoring update of a todo pending deletion");
            return Ok(false);
        }
        if patch.is_empty() {
            return Ok(true);
        }

        patch.apply_to(&mut todo);
        todo.updated_at = next_edit_time(self.now(), todo.updated_at);
        todo.synced = todo.synced.after_local_edit();

        let updated = write_row(&mut tx, &todo).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn trash(&self, uuid: Uuid) -> Result<bool> {
        self.set_trashed(uuid, true).await
    }

    async fn restore(&self, uuid: Uuid) -> Result<bool> {
        self.set_trashed(uuid, false).await
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    async fn soft_delete(&self, uuid: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE todos SET synced = ?, updated_at = MAX(?, updated_at + 1) WHERE uuid = ?",
        )
        .bind(SyncState::PendingDelete.as_i64())
        .bind(to_millis(self.now()))
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("No todo to delete");
            return Ok(false);
        }
        Ok(true)
    }

    async fn hard_delete(&self, uuid: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM todos WHERE uuid = ?")
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_ids(&self, query: &TodoQuery) -> Result<Vec<i64>> {
        let spec = build_todo_id_query(query);
        let mut q = sqlx::query_scalar::<_, i64>(&spec.sql);
        for bind in &spec.binds {
            q = match bind {
                BindValue::Text(value) => q.bind(value.clone()),
                BindValue::I64(value) => q.bind(*value),
            };
        }
        let ids = q.fetch_all(&self.pool).await?;
        Ok(ids)
    }

    #[instrument(skip(self, items), fields(count = items.len(), source = ?source, policy = ?policy))]
    async fn import_from_remote(
        &self,
        items: &[Value],
        source: ImportSource,
        policy: ConflictPolicy,
    ) -> Result<ImportSummary> {
        let now = self.now();
        let mut summary = ImportSummary::default();
        let mut tx = self.pool.begin().await?;

        for item in items {
            let mut incoming = match parse_todo(item, now) {
                Ok(todo) => todo,
                Err(reason) => {
                    warn!(%reason, "Skipping invalid todo");
                    summary.skipped += 1;
                    continue;
                }
            };

            let existing = fetch_by_uuid(&mut tx, incoming.uuid).await?;
            match evaluate(existing.as_ref(), &incoming, policy) {
                ConflictAction::Skip => summary.skipped += 1,
                ConflictAction::Insert => {
                    if existing.is_some() {
                        // Forced insert over a known record: keep both.
                        incoming.uuid = Uuid::new_v4();
                    }
                    incoming.synced = state_for_insert(source);
                    insert_row(&mut tx, &incoming).await?;
                    summary.inserted += 1;
                }
                ConflictAction::Overwrite => {
                    let previous = existing.map(|e| e.synced).unwrap_or(SyncState::Synced);
                    incoming.synced = state_for_overwrite(source, previous);
                    write_row(&mut tx, &incoming).await?;
                    summary.updated += 1;
                }
            }
        }

        tx.commit().await?;
        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            "Todo import finished"
        );
        Ok(summary)
    }

    async fn export_all(&self) -> Result<Value> {
        let todos = self.load_all().await?;
        Ok(todos_to_wire(&todos))
    }

    async fn load_pending(&self) -> Result<Vec<Todo>> {
        let todos = query_as::<_, Todo>("SELECT * FROM todos WHERE synced != ? ORDER BY id")
            .bind(SyncState::Synced.as_i64())
            .fetch_all(&self.pool)
            .await?;
        Ok(todos)
    }

    #[instrument(skip(self, versions), fields(count = versions.len()))]
    async fn mark_synced(&self, versions: &[RecordVersion]) -> Result<u64> {
        if versions.is_empty() {
            return Ok(0);
        }

        let now = self.now();
        let mut confirmed = 0;
        let mut tx = self.pool.begin().await?;
        for version in versions {
            if confirm_version(&mut tx, "todos", version, now).await? {
                confirmed += 1;
            }
        }
        tx.commit().await?;

        let superseded = versions.len() as u64 - confirmed;
        debug!(confirmed, superseded, "Marked todos synced");
        Ok(confirmed)
    }

    async fn mark_all_pending(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE todos SET synced = ? WHERE synced != ?")
            .bind(SyncState::PendingInsert.as_i64())
            .bind(SyncState::PendingDelete.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn reassign_owner(&self, user_uuid: Uuid) -> Result<u64> {
        let result = sqlx::query("UPDATE todos SET user_uuid = ?")
            .bind(user_uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM todos").execute(&self.pool).await?;
        info!(removed = result.rows_affected(), "Deleted all todos");
        Ok(result.rows_affected())
    }

    async fn count_pending(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM todos WHERE synced != ?")
            .bind(SyncState::Synced.as_i64())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::SyncRecord;
    use crate::query::{StatusFilter, TodoSort};
    use bridge_traits::time::ManualClock;
    use chrono::{Duration, NaiveDate, TimeZone};
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    async fn setup() -> (SqliteTodoRepository, Arc<ManualClock>) {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        (SqliteTodoRepository::with_clock(pool, clock.clone()), clock)
    }

    fn user() -> Uuid {
        Uuid::parse_str("6f1c1b52-9d47-4a8f-9f57-2b4d1b0c7e11").unwrap()
    }

    /// Acknowledges every pending row as it stands now.
    async fn confirm_pending(repo: &SqliteTodoRepository) -> u64 {
        let versions: Vec<RecordVersion> = repo
            .load_pending()
            .await
            .unwrap()
            .iter()
            .map(SyncRecord::version)
            .collect();
        repo.mark_synced(&versions).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_is_pending_insert() {
        let (repo, _) = setup().await;
        let todo = repo
            .insert(NewTodo::new(user(), "Buy milk").category("Home"))
            .await
            .unwrap();

        assert!(todo.id > 0);
        assert_eq!(todo.synced, SyncState::PendingInsert);
        assert_eq!(todo.created_at, start());

        let loaded = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();
        assert_eq!(loaded, todo);
    }

    #[tokio::test]
    async fn test_insert_rejects_blank_title() {
        let (repo, _) = setup().await;
        let result = repo.insert(NewTodo::new(user(), " ")).await;
        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_update_sets_pending_update_for_synced_rows() {
        let (repo, clock) = setup().await;
        let todo = repo.insert(NewTodo::new(user(), "Draft")).await.unwrap();

        // Still a pending insert: the server has never seen it.
        clock.advance(Duration::minutes(1));
        assert!(repo
            .update(todo.uuid, &TodoPatch::new().title("Draft 2"))
            .await
            .unwrap());
        let loaded = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();
        assert_eq!(loaded.synced, SyncState::PendingInsert);
        assert_eq!(loaded.updated_at, start() + Duration::minutes(1));

        confirm_pending(&repo).await;
        assert!(repo
            .update(todo.uuid, &TodoPatch::new().important(true))
            .await
            .unwrap());
        let loaded = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();
        assert_eq!(loaded.synced, SyncState::PendingUpdate);
        assert!(loaded.important);
        assert_eq!(loaded.title, "Draft 2");
    }

    #[tokio::test]
    async fn test_update_unknown_uuid() {
        let (repo, _) = setup().await;
        assert!(!repo
            .update(Uuid::new_v4(), &TodoPatch::new().title("x"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_trash_and_restore() {
        let (repo, _) = setup().await;
        let todo = repo.insert(NewTodo::new(user(), "Old")).await.unwrap();

        assert!(repo.trash(todo.uuid).await.unwrap());
        let loaded = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();
        assert!(loaded.is_deleted);
        assert_eq!(loaded.deleted_at, Some(start()));

        let recycled = repo
            .query_ids(&TodoQuery::new().status(StatusFilter::Recycle))
            .await
            .unwrap();
        assert_eq!(recycled, vec![todo.id]);

        assert!(repo.restore(todo.uuid).await.unwrap());
        let loaded = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();
        assert!(!loaded.is_deleted);
        assert_eq!(loaded.deleted_at, None);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_until_confirmed() {
        let (repo, _) = setup().await;
        let keep = repo.insert(NewTodo::new(user(), "Keep")).await.unwrap();
        let gone = repo.insert(NewTodo::new(user(), "Gone")).await.unwrap();

        assert!(repo.soft_delete(gone.uuid).await.unwrap());
        assert_eq!(
            repo.query_ids(&TodoQuery::new().status(StatusFilter::All))
                .await
                .unwrap(),
            vec![keep.id]
        );
        assert_eq!(repo.load_all().await.unwrap().len(), 1);
        assert_eq!(repo.load_pending().await.unwrap().len(), 2);

        assert_eq!(confirm_pending(&repo).await, 2);
        assert!(repo.find_by_uuid(gone.uuid).await.unwrap().is_none());
        let kept = repo.find_by_uuid(keep.uuid).await.unwrap().unwrap();
        assert_eq!(kept.synced, SyncState::Synced);
        assert_eq!(repo.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_synced_refreshes_updated_at() {
        let (repo, clock) = setup().await;
        let todo = repo.insert(NewTodo::new(user(), "Sync me")).await.unwrap();

        clock.advance(Duration::hours(2));
        assert_eq!(repo.mark_synced(&[todo.version()]).await.unwrap(), 1);

        let loaded = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();
        assert_eq!(loaded.synced, SyncState::Synced);
        assert_eq!(loaded.updated_at, start() + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_query_filters_and_sorting() {
        let (repo, clock) = setup().await;
        let a = repo
            .insert(
                NewTodo::new(user(), "banana")
                    .category("Work")
                    .deadline(Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap()),
            )
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        let b = repo
            .insert(NewTodo::new(user(), "Apple").category("Work").important(true))
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        let c = repo
            .insert(
                NewTodo::new(user(), "cherry pie")
                    .description("bake")
                    .deadline(Utc.with_ymd_and_hms(2026, 3, 12, 23, 59, 0).unwrap()),
            )
            .await
            .unwrap();
        repo.update(c.uuid, &TodoPatch::new().completed(Some(start())))
            .await
            .unwrap();

        let work = repo
            .query_ids(&TodoQuery::new().category("Work").sort(TodoSort::CreatedAt, false))
            .await
            .unwrap();
        assert_eq!(work, vec![a.id, b.id]);

        let done = repo
            .query_ids(&TodoQuery::new().status(StatusFilter::Done))
            .await
            .unwrap();
        assert_eq!(done, vec![c.id]);

        let open = repo
            .query_ids(&TodoQuery::new().status(StatusFilter::Todo))
            .await
            .unwrap();
        assert_eq!(open.len(), 2);

        let by_title = repo
            .query_ids(&TodoQuery::new().sort(TodoSort::Title, false))
            .await
            .unwrap();
        assert_eq!(by_title, vec![b.id, a.id, c.id]);

        let by_deadline = repo
            .query_ids(&TodoQuery::new().sort(TodoSort::Deadline, false))
            .await
            .unwrap();
        assert_eq!(by_deadline, vec![a.id, c.id, b.id]);

        let important_first = repo
            .query_ids(&TodoQuery::new().sort(TodoSort::Importance, false))
            .await
            .unwrap();
        assert_eq!(important_first[0], b.id);

        let searched = repo
            .query_ids(&TodoQuery::new().search("BAKE"))
            .await
            .unwrap();
        assert_eq!(searched, vec![c.id]);

        let window = repo
            .query_ids(&TodoQuery::new().deadline_between(
                NaiveDate::from_ymd_opt(2026, 3, 11),
                NaiveDate::from_ymd_opt(2026, 3, 12),
            ))
            .await
            .unwrap();
        assert_eq!(window, vec![c.id]);

        let paged = repo
            .query_ids(&TodoQuery::new().sort(TodoSort::CreatedAt, false).limit(1).offset(1))
            .await
            .unwrap();
        assert_eq!(paged, vec![b.id]);
    }

    #[tokio::test]
    async fn test_import_skips_invalid_items() {
        let (repo, _) = setup().await;
        let items = vec![
            json!(42),
            json!({"title": "no owner"}),
            json!({"title": "bad owner", "user_uuid": "xyz"}),
            json!({"title": "ok", "user_uuid": user().to_string()}),
        ];

        let summary = repo
            .import_from_remote(&items, ImportSource::Server, ConflictPolicy::Merge)
            .await
            .unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                inserted: 1,
                updated: 0,
                skipped: 3
            }
        );
        let all = repo.load_all().await.unwrap();
        assert_eq!(all[0].synced, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_import_merge_prefers_newer_server_record() {
        let (repo, _) = setup().await;
        let local = repo.insert(NewTodo::new(user(), "local")).await.unwrap();

        let mut older = TodoWireFixture::from(&local);
        older.title = "older server copy";
        older.updated_at = start() - Duration::hours(1);
        let mut newer = TodoWireFixture::from(&local);
        newer.title = "newer server copy";
        newer.updated_at = start() + Duration::hours(1);

        let summary = repo
            .import_from_remote(&[older.json()], ImportSource::Server, ConflictPolicy::Merge)
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);

        let summary = repo
            .import_from_remote(&[newer.json()], ImportSource::Server, ConflictPolicy::Merge)
            .await
            .unwrap();
        assert_eq!(summary.updated, 1);

        let loaded = repo.find_by_uuid(local.uuid).await.unwrap().unwrap();
        assert_eq!(loaded.title, "newer server copy");
        assert_eq!(loaded.synced, SyncState::Synced);
        assert_eq!(loaded.id, local.id);
    }

    #[tokio::test]
    async fn test_local_overwrite_keeps_pending_insert() {
        let (repo, _) = setup().await;
        let local = repo.insert(NewTodo::new(user(), "local")).await.unwrap();
        let mut incoming = TodoWireFixture::from(&local);
        incoming.title = "from backup";

        repo.import_from_remote(&[incoming.json()], ImportSource::Local, ConflictPolicy::Overwrite)
            .await
            .unwrap();

        let loaded = repo.find_by_uuid(local.uuid).await.unwrap().unwrap();
        assert_eq!(loaded.title, "from backup");
        assert_eq!(loaded.synced, SyncState::PendingInsert);
    }

    #[tokio::test]
    async fn test_forced_insert_keeps_both_records() {
        let (repo, _) = setup().await;
        let local = repo.insert(NewTodo::new(user(), "local")).await.unwrap();
        let incoming = TodoWireFixture::from(&local);

        let summary = repo
            .import_from_remote(&[incoming.json()], ImportSource::Local, ConflictPolicy::Insert)
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);

        let all = repo.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_ne!(all[0].uuid, all[1].uuid);
    }

    #[tokio::test]
    async fn test_export_then_import_into_empty_store() {
        let (source, clock) = setup().await;
        source
            .insert(
                NewTodo::new(user(), "Taxes")
                    .description("file online")
                    .category("Finance")
                    .important(true)
                    .deadline(Utc.with_ymd_and_hms(2026, 4, 15, 12, 0, 0).unwrap())
                    .recurrence(365, 3, NaiveDate::from_ymd_opt(2026, 4, 1)),
            )
            .await
            .unwrap();
        clock.advance(Duration::seconds(5));
        let done = source.insert(NewTodo::new(user(), "Done thing")).await.unwrap();
        source
            .update(done.uuid, &TodoPatch::new().completed(Some(clock.now())))
            .await
            .unwrap();
        let done = source.find_by_uuid(done.uuid).await.unwrap().unwrap();
        source.mark_synced(&[done.version()]).await.unwrap();

        let exported = source.export_all().await.unwrap();
        let items = exported.as_array().unwrap().clone();

        let (target, _) = setup().await;
        let summary = target
            .import_from_remote(&items, ImportSource::Local, ConflictPolicy::Insert)
            .await
            .unwrap();
        assert_eq!(summary.inserted, 2);

        let original = source.load_all().await.unwrap();
        let imported = target.load_all().await.unwrap();
        assert_eq!(original.len(), imported.len());
        for (before, after) in original.iter().zip(&imported) {
            assert!(before.same_fields(after), "{before:?} != {after:?}");
            assert_eq!(after.synced, SyncState::PendingInsert);
        }
    }

    #[tokio::test]
    async fn test_mark_all_pending_and_delete_all() {
        let (repo, _) = setup().await;
        let a = repo.insert(NewTodo::new(user(), "a")).await.unwrap();
        let b = repo.insert(NewTodo::new(user(), "b")).await.unwrap();
        assert_eq!(repo.mark_synced(&[a.version(), b.version()]).await.unwrap(), 2);
        assert_eq!(repo.count_pending().await.unwrap(), 0);

        let other = Uuid::new_v4();
        assert_eq!(repo.reassign_owner(other).await.unwrap(), 2);
        assert_eq!(repo.mark_all_pending().await.unwrap(), 2);
        let all = repo.load_all().await.unwrap();
        assert!(all
            .iter()
            .all(|t| t.synced == SyncState::PendingInsert && t.user_uuid == other));

        assert_eq!(repo.delete_all().await.unwrap(), 2);
        assert!(repo.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ack_of_older_version_keeps_edit_pending() {
        let (repo, _) = setup().await;
        let todo = repo.insert(NewTodo::new(user(), "v0")).await.unwrap();
        confirm_pending(&repo).await;

        repo.update(todo.uuid, &TodoPatch::new().title("v1"))
            .await
            .unwrap();
        let pushed = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();

        // Edited again before the upload of "v1" is acknowledged, at the
        // same clock reading.
        repo.update(todo.uuid, &TodoPatch::new().title("v2"))
            .await
            .unwrap();
        assert_eq!(repo.mark_synced(&[pushed.version()]).await.unwrap(), 0);

        let loaded = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();
        assert_eq!(loaded.title, "v2");
        assert_eq!(loaded.synced, SyncState::PendingUpdate);
        assert!(loaded.updated_at > pushed.updated_at);

        assert_eq!(confirm_pending(&repo).await, 1);
        let loaded = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();
        assert_eq!(loaded.synced, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_ack_of_update_does_not_drop_later_delete() {
        let (repo, _) = setup().await;
        let todo = repo.insert(NewTodo::new(user(), "Doomed")).await.unwrap();
        confirm_pending(&repo).await;
        repo.update(todo.uuid, &TodoPatch::new().important(true))
            .await
            .unwrap();
        let pushed = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();

        repo.soft_delete(todo.uuid).await.unwrap();
        assert_eq!(repo.mark_synced(&[pushed.version()]).await.unwrap(), 0);

        let loaded = repo.find_by_uuid(todo.uuid).await.unwrap().unwrap();
        assert_eq!(loaded.synced, SyncState::PendingDelete);

        assert_eq!(confirm_pending(&repo).await, 1);
        assert!(repo.find_by_uuid(todo.uuid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_all_pending_keeps_pending_deletes() {
        let (repo, _) = setup().await;
        let keep = repo.insert(NewTodo::new(user(), "keep")).await.unwrap();
        let gone = repo.insert(NewTodo::new(user(), "gone")).await.unwrap();
        confirm_pending(&repo).await;
        repo.soft_delete(gone.uuid).await.unwrap();

        assert_eq!(repo.mark_all_pending().await.unwrap(), 1);

        let visible = repo.load_all().await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].uuid, keep.uuid);
        assert_eq!(visible[0].synced, SyncState::PendingInsert);
        let gone = repo.find_by_uuid(gone.uuid).await.unwrap().unwrap();
        assert_eq!(gone.synced, SyncState::PendingDelete);
    }

    /// Wire JSON for an existing todo with a few overridable fields.
    struct TodoWireFixture {
        base: Todo,
        title: &'static str,
        updated_at: DateTime<Utc>,
    }

    impl TodoWireFixture {
        fn from(todo: &Todo) -> Self {
            Self {
                base: todo.clone(),
                title: "copy",
                updated_at: todo.updated_at,
            }
        }

        fn json(&self) -> Value {
            let mut todo = self.base.clone();
            todo.title = self.title.to_string();
            todo.updated_at = self.updated_at;
            serde_json::to_value(crate::wire::TodoWire::from(&todo)).unwrap()
        }
    }
}
