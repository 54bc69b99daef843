//! # Local Store Database
//!
//! Opens the SQLite database behind the todo and category repositories and
//! applies the embedded migrations.
//!
//! A file-backed store runs in WAL mode with a small pool. The in-memory
//! store (the default when no path is configured, and what tests use) is
//! pinned to one connection: every SQLite connection to `:memory:` opens a
//! separate database, so a second pooled connection would see empty tables.
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("todos.db")).await?;
//! let repo = SqliteTodoRepository::new(pool);
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the store lives and how the pool around it is sized.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Recycle connections after this long; `None` keeps them forever.
    pub max_lifetime: Option<Duration>,
}

impl DatabaseConfig {
    /// A file-backed store, created on first use.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        Self {
            database_url: format!("sqlite:{}", path.display()),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
        }
    }

    /// A throwaway store that lives as long as the pool.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Opens the pool and brings the schema up to date.
///
/// # Errors
///
/// `LibraryError::Database` when the file cannot be opened,
/// `LibraryError::Migration` when the schema cannot be applied.
pub async fn create_pool(config: DatabaseConfig) -> Result<SqlitePool> {
    info!(database_url = %config.database_url, "Opening local store");

    let mut options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal);
    if !config.is_in_memory() {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // An in-memory database dies with its last connection.
    let (max_connections, idle_timeout) = if config.is_in_memory() {
        (1, None)
    } else {
        (config.max_connections.max(1), Some(Duration::from_secs(600)))
    };

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(idle_timeout)
        .connect_with(options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open local store");
            LibraryError::Database(e)
        })?;

    run_migrations(&pool).await?;
    debug!(connections = pool.size(), "Local store ready");
    Ok(pool)
}

/// In-memory store with the schema applied, for tests.
pub async fn create_test_pool() -> Result<SqlitePool> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Migration failed");
            LibraryError::Migration(e.to_string())
        })?;
    debug!("Migrations applied");
    Ok(())
}
