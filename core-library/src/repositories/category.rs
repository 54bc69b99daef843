//! Category repository trait and implementation

use crate::conflict::{evaluate, state_for_insert, state_for_overwrite, ConflictAction, ConflictPolicy, ImportSource};
use crate::error::{LibraryError, Result};
use crate::models::{
    next_edit_time, to_millis, truncate_millis, Category, CategoryPatch, RecordVersion, SyncState,
};
use crate::repositories::{confirm_version, ImportSummary};
use crate::wire::{categories_to_wire, parse_category};
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{query_as, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Category repository interface for data access operations
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Category>>;

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Category>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Category>>;

    /// Create a category as a pending insert.
    ///
    /// # Errors
    /// Returns `AlreadyExists` if the name is taken
    async fn insert(&self, name: &str, user_uuid: Uuid) -> Result<Category>;

    /// # Returns
    /// - `Ok(true)` if the category was updated
    /// - `Ok(false)` if no live category has this UUID
    async fn update(&self, uuid: Uuid, patch: &CategoryPatch) -> Result<bool>;

    async fn rename(&self, uuid: Uuid, name: &str) -> Result<bool> {
        self.update(uuid, &CategoryPatch::rename(name)).await
    }

    async fn soft_delete(&self, uuid: Uuid) -> Result<bool>;

    async fn hard_delete(&self, uuid: Uuid) -> Result<bool>;

    async fn import_from_remote(
        &self,
        items: &[Value],
        source: ImportSource,
        policy: ConflictPolicy,
    ) -> Result<ImportSummary>;

    async fn export_all(&self) -> Result<Value>;

    async fn load_pending(&self) -> Result<Vec<Category>>;

    /// Confirms an upload; rows edited since `versions` were read stay pending.
    async fn mark_synced(&self, versions: &[RecordVersion]) -> Result<u64>;

    async fn mark_all_pending(&self) -> Result<u64>;

    async fn reassign_owner(&self, user_uuid: Uuid) -> Result<u64>;

    async fn delete_all(&self) -> Result<u64>;

    async fn count_pending(&self) -> Result<i64>;
}

/// SQLite implementation of CategoryRepository
pub struct SqliteCategoryRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteCategoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        truncate_millis(self.clock.now())
    }
}

async fn fetch_by_uuid(conn: &mut SqliteConnection, uuid: Uuid) -> Result<Option<Category>> {
    let category = query_as::<_, Category>("SELECT * FROM categories WHERE uuid = ?")
        .bind(uuid.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(category)
}

async fn fetch_by_name(conn: &mut SqliteConnection, name: &str) -> Result<Option<Category>> {
    let category = query_as::<_, Category>("SELECT * FROM categories WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(category)
}

async fn insert_row(conn: &mut SqliteConnection, category: &Category) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO categories (uuid, user_uuid, name, created_at, updated_at, synced) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(category.uuid.to_string())
    .bind(category.user_uuid.to_string())
    .bind(&category.name)
    .bind(to_millis(category.created_at))
    .bind(to_millis(category.updated_at))
    .bind(category.synced.as_i64())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Writes every mutable column of the row with id `category.id`.
async fn write_row(conn: &mut SqliteConnection, category: &Category) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE categories SET uuid = ?, user_uuid = ?, name = ?, created_at = ?, updated_at = ?, \
         synced = ? WHERE id = ?",
    )
    .bind(category.uuid.to_string())
    .bind(category.user_uuid.to_string())
    .bind(&category.name)
    .bind(to_millis(category.created_at))
    .bind(to_millis(category.updated_at))
    .bind(category.synced.as_i64())
    .bind(category.id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

fn already_exists(name: &str) -> LibraryError {
    LibraryError::AlreadyExists {
        entity_type: "Category".to_string(),
        key: name.to_string(),
    }
}

#[async_trait]
impl CategoryRepository for SqliteCategoryRepository {
    async fn load_all(&self) -> Result<Vec<Category>> {
        let categories =
            query_as::<_, Category>("SELECT * FROM categories WHERE synced != ? ORDER BY id")
                .bind(SyncState::PendingDelete.as_i64())
                .fetch_all(&self.pool)
                .await?;
        Ok(categories)
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Category>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_uuid(&mut conn, uuid).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Category>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_name(&mut conn, name.trim()).await
    }

    #[instrument(skip(self), fields(name = %name))]
    async fn insert(&self, name: &str, user_uuid: Uuid) -> Result<Category> {
        Category::validate_name(name).map_err(|msg| LibraryError::invalid("name", msg))?;
        let name = name.trim();

        let mut tx = self.pool.begin().await?;
        if fetch_by_name(&mut tx, name).await?.is_some() {
            return Err(already_exists(name));
        }

        let now = self.now();
        let mut category = Category {
            id: 0,
            uuid: Uuid::new_v4(),
            user_uuid,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            synced: SyncState::PendingInsert,
        };
        category.id = insert_row(&mut tx, &category).await?;
        tx.commit().await?;

        debug!(uuid = %category.uuid, "Inserted category");
        Ok(category)
    }

    #[instrument(skip(self, patch), fields(uuid = %uuid))]
    async fn update(&self, uuid: Uuid, patch: &CategoryPatch) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let Some(mut category) = fetch_by_uuid(&mut tx, uuid).await? else {
            return Ok(false);
        };
        if category.synced == SyncState::PendingDelete {
            return Ok(false);
        }

        if let Some(name) = &patch.name {
            Category::validate_name(name).map_err(|msg| LibraryError::invalid("name", msg))?;
            let name = name.trim();
            if name == category.name {
                return Ok(true);
            }
            if fetch_by_name(&mut tx, name).await?.is_some() {
                return Err(already_exists(name));
            }
            category.name = name.to_string();
        } else {
            return Ok(true);
        }

        category.updated_at = next_edit_time(self.now(), category.updated_at);
        category.synced = category.synced.after_local_edit();
        let updated = write_row(&mut tx, &category).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn soft_delete(&self, uuid: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE categories SET synced = ?, updated_at = MAX(?, updated_at + 1) WHERE uuid = ?",
        )
        .bind(SyncState::PendingDelete.as_i64())
        .bind(to_millis(self.now()))
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            warn!(%uuid, "No category to delete");
            return Ok(false);
        }
        Ok(true)
    }

    async fn hard_delete(&self, uuid: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE uuid = ?")
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
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
            let mut incoming = match parse_category(item, now) {
                Ok(category) => category,
                Err(reason) => {
                    warn!(%reason, "Skipping invalid category");
                    summary.skipped += 1;
                    continue;
                }
            };

            let existing = match fetch_by_uuid(&mut tx, incoming.uuid).await? {
                Some(found) => Some(found),
                None => fetch_by_name(&mut tx, &incoming.name).await?,
            };

            match evaluate(existing.as_ref(), &incoming, policy) {
                ConflictAction::Skip => summary.skipped += 1,
                ConflictAction::Insert => {
                    if existing.is_some() {
                        if fetch_by_name(&mut tx, &incoming.name).await?.is_some() {
                            debug!(name = %incoming.name, "Forced insert collides on name");
                            summary.skipped += 1;
                            continue;
                        }
                        incoming.uuid = Uuid::new_v4();
                    }
                    incoming.synced = state_for_insert(source);
                    insert_row(&mut tx, &incoming).await?;
                    summary.inserted += 1;
                }
                ConflictAction::Overwrite => {
                    let Some(existing) = existing else {
                        continue;
                    };
                    // A name-only match may collide with another row's name
                    // after the rename; skip rather than violate uniqueness.
                    if existing.name != incoming.name {
                        if let Some(other) = fetch_by_name(&mut tx, &incoming.name).await? {
                            if other.id != existing.id {
                                summary.skipped += 1;
                                continue;
                            }
                        }
                    }
                    incoming.id = existing.id;
                    incoming.synced = state_for_overwrite(source, existing.synced);
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
            "Category import finished"
        );
        Ok(summary)
    }

    async fn export_all(&self) -> Result<Value> {
        let categories = self.load_all().await?;
        Ok(categories_to_wire(&categories))
    }

    async fn load_pending(&self) -> Result<Vec<Category>> {
        let categories =
            query_as::<_, Category>("SELECT * FROM categories WHERE synced != ? ORDER BY id")
                .bind(SyncState::Synced.as_i64())
                .fetch_all(&self.pool)
                .await?;
        Ok(categories)
    }

    async fn mark_synced(&self, versions: &[RecordVersion]) -> Result<u64> {
        if versions.is_empty() {
            return Ok(0);
        }

        let now = self.now();
        let mut confirmed = 0;
        let mut tx = self.pool.begin().await?;
        for version in versions {
            if confirm_version(&mut tx, "categories", version, now).await? {
                confirmed += 1;
            }
        }
        tx.commit().await?;

        Ok(confirmed)
    }

    async fn mark_all_pending(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE categories SET synced = ? WHERE synced != ?")
            .bind(SyncState::PendingInsert.as_i64())
            .bind(SyncState::PendingDelete.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn reassign_owner(&self, user_uuid: Uuid) -> Result<u64> {
        let result = sqlx::query("UPDATE categories SET user_uuid = ?")
            .bind(user_uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM categories")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_pending(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE synced != ?")
            .bind(SyncState::Synced.as_i64())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
