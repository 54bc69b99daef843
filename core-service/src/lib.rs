//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (network transport,
//! secure storage, settings) into the shared Rust core exactly once per
//! process. Desktop apps typically enable the `desktop-shims` feature (which
//! depends on `bridge-desktop`) and call [`bootstrap_desktop`]; other hosts
//! build a [`CoreDependencies`] bundle themselves.
//!
//! ```rust,ignore
//! let service = SyncService::new(deps, config).await?;
//! service.start().await;
//! service.login("alice", "secret").await?;
//! // FirstAuthCompleted triggers a bidirectional sync of every entity.
//! ```

pub mod error;

pub use error::{Result, ServiceError};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bridge_traits::network::Transport;
use bridge_traits::storage::{SecureStore, SettingsStore};
use bridge_traits::time::{Clock, SystemClock};
use core_auth::{AuthSettings, CredentialManager, UserIdentity};
use core_library::{
    create_pool, CategoryRepository, DatabaseConfig, SqliteCategoryRepository,
    SqliteTodoRepository, TodoRepository,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{
    AuthEvent, CoreEvent, EntityKind, EventBus, Receiver, RecvError, SyncDirection,
    DEFAULT_EVENT_BUFFER_SIZE,
};
use core_sync::{
    CategorySyncDriver, EntitySyncDriver, OrchestratorSettings, RequestSettings,
    SyncOrchestrator, SyncOutcome, TodoSyncDriver,
};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(feature = "desktop-shims")]
pub use desktop::bootstrap_desktop;

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub transport: Arc<dyn Transport>,
    pub secure_store: Arc<dyn SecureStore>,
    pub settings_store: Option<Arc<dyn SettingsStore>>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(transport: Arc<dyn Transport>, secure_store: Arc<dyn SecureStore>) -> Self {
        Self {
            transport,
            secure_store,
            settings_store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Persist per-entity sync state through a settings bridge.
    pub fn with_settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// What happens to local records on logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalDataPolicy {
    /// Keep every record and re-upload it for the next signed-in user.
    Preserve,
    /// Purge the local store.
    Discard,
}

/// Process-wide sync context. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: CoreConfig,
    event_bus: EventBus,
    credentials: CredentialManager,
    pool: SqlitePool,
    todos: Arc<dyn TodoRepository>,
    categories: Arc<dyn CategoryRepository>,
    todo_sync: SyncOrchestrator,
    category_sync: SyncOrchestrator,
    /// Set by a preserving logout; the next user adopts the kept records.
    adopt_local_data: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        let handle = match self.listener.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl SyncService {
    /// Builds every component once: event bus, credential manager, local
    /// store, drivers and one orchestrator per entity kind.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the local store cannot be
    /// opened.
    pub async fn new(deps: CoreDependencies, config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(DEFAULT_EVENT_BUFFER_SIZE);
        let credentials = CredentialManager::new(
            AuthSettings::from_config(&config),
            deps.transport.clone(),
            deps.secure_store.clone(),
            event_bus.clone(),
            deps.clock.clone(),
        );

        let db_config = match &config.database_path {
            Some(path) => DatabaseConfig::new(path.clone()),
            None => DatabaseConfig::in_memory(),
        };
        let pool = create_pool(db_config).await?;
        let todos: Arc<dyn TodoRepository> = Arc::new(SqliteTodoRepository::with_clock(
            pool.clone(),
            deps.clock.clone(),
        ));
        let categories: Arc<dyn CategoryRepository> = Arc::new(
            SqliteCategoryRepository::with_clock(pool.clone(), deps.clock.clone()),
        );

        let request_settings = RequestSettings {
            timeout: config.request_timeout,
            max_retries: config.max_retries,
        };
        let orchestrator_settings = OrchestratorSettings::from_config(&config);
        let credential_provider = Arc::new(credentials.clone());

        let build = |driver: Arc<dyn EntitySyncDriver>| {
            let mut builder = SyncOrchestrator::builder(
                driver,
                deps.transport.clone(),
                credential_provider.clone(),
                event_bus.clone(),
            )
            .clock(deps.clock.clone())
            .settings(orchestrator_settings.clone());
            if let Some(store) = &deps.settings_store {
                builder = builder.settings_store(store.clone());
            }
            builder.build()
        };

        let todo_driver: Arc<dyn EntitySyncDriver> = Arc::new(TodoSyncDriver::new(
            deps.transport.clone(),
            todos.clone(),
            config.endpoint_for(EntityKind::Todo),
            request_settings.clone(),
        ));
        let category_driver: Arc<dyn EntitySyncDriver> = Arc::new(CategorySyncDriver::new(
            deps.transport.clone(),
            categories.clone(),
            config.endpoint_for(EntityKind::Category),
            request_settings,
        ));
        let todo_sync = build(todo_driver);
        let category_sync = build(category_driver);

        info!(
            server = %config.server_base_url,
            persistent = config.database_path.is_some(),
            "Sync service initialized"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                event_bus,
                credentials,
                pool,
                todos,
                categories,
                todo_sync,
                category_sync,
                adopt_local_data: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.inner.event_bus.subscribe()
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.inner.credentials
    }

    pub fn todos(&self) -> Arc<dyn TodoRepository> {
        self.inner.todos.clone()
    }

    pub fn categories(&self) -> Arc<dyn CategoryRepository> {
        self.inner.categories.clone()
    }

    pub fn orchestrator(&self, entity: EntityKind) -> &SyncOrchestrator {
        match entity {
            EntityKind::Todo => &self.inner.todo_sync,
            EntityKind::Category => &self.inner.category_sync,
        }
    }

    /// Orchestrators in sync order: categories before the todos that name them.
    fn orchestrators(&self) -> [&SyncOrchestrator; 2] {
        [&self.inner.category_sync, &self.inner.todo_sync]
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restores persisted state, starts the first-auth listener and the
    /// auto-sync timers.
    ///
    /// A failed credential restore is logged, not returned: the service stays
    /// usable and waits for a login.
    pub async fn start(&self) {
        for orchestrator in self.orchestrators() {
            if let Some(at) = orchestrator.restore_last_sync_time().await {
                debug!(entity = %orchestrator.entity(), last_sync = %at, "Restored last sync time");
            }
        }

        self.spawn_first_auth_listener();

        match self.inner.credentials.restore().await {
            Ok(true) => info!("Credentials restored"),
            Ok(false) => debug!("No stored credentials; waiting for login"),
            Err(e) => warn!(error = %e, "Credential restore failed"),
        }

        for orchestrator in self.orchestrators() {
            orchestrator.start_auto_sync();
        }
    }

    /// Stops timers and listeners, cancels in-flight syncs and closes the
    /// local store.
    pub async fn shutdown(&self) {
        info!("Shutting down sync service");
        if let Some(listener) = self.lock_listener().take() {
            listener.abort();
        }
        for orchestrator in self.orchestrators() {
            orchestrator.stop_auto_sync();
            orchestrator.cancel();
        }
        self.inner.pool.close().await;
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_first_auth_listener(&self) {
        let mut events = self.inner.event_bus.subscribe();
        let weak: Weak<ServiceInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let user_uuid = match events.recv().await {
                    Ok(CoreEvent::Auth(AuthEvent::FirstAuthCompleted { user_uuid })) => user_uuid,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "First-auth listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let service = SyncService { inner };
                service.on_first_auth(&user_uuid).await;
            }
        });

        if let Some(previous) = self.lock_listener().replace(task) {
            previous.abort();
        }
    }

    async fn on_first_auth(&self, user_uuid: &str) {
        info!(%user_uuid, "First authentication; syncing all entities");
        if self.inner.adopt_local_data.swap(false, Ordering::SeqCst) {
            match Uuid::parse_str(user_uuid) {
                Ok(owner) => {
                    if let Err(e) = self.adopt_records(owner).await {
                        warn!(error = %e, "Failed to hand preserved records to the new user");
                    }
                }
                Err(e) => warn!(error = %e, "FirstAuthCompleted carried an invalid user uuid"),
            }
        }
        let service = self.clone();
        tokio::spawn(async move {
            service.sync_all(SyncDirection::Bidirectional).await;
        });
    }

    async fn adopt_records(&self, owner: Uuid) -> Result<()> {
        let todos = self.inner.todos.reassign_owner(owner).await?;
        let categories = self.inner.categories.reassign_owner(owner).await?;
        info!(todos, categories, %owner, "Preserved records adopted");
        Ok(())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub async fn login(&self, account: &str, password: &str) -> Result<UserIdentity> {
        Ok(self.inner.credentials.login(account, password).await?)
    }

    /// Logs out, then keeps or purges local data.
    ///
    /// In-flight syncs are cancelled first so nothing is uploaded on behalf
    /// of the departing user.
    pub async fn logout(&self, policy: LocalDataPolicy) -> Result<()> {
        for orchestrator in self.orchestrators() {
            orchestrator.cancel();
        }
        self.inner.credentials.logout().await;

        match policy {
            LocalDataPolicy::Preserve => {
                let todos = self.inner.todos.mark_all_pending().await?;
                let categories = self.inner.categories.mark_all_pending().await?;
                self.inner.adopt_local_data.store(true, Ordering::SeqCst);
                info!(todos, categories, "Local data preserved for re-upload");
            }
            LocalDataPolicy::Discard => {
                let todos = self.inner.todos.delete_all().await?;
                let categories = self.inner.categories.delete_all().await?;
                self.inner.adopt_local_data.store(false, Ordering::SeqCst);
                info!(todos, categories, "Local data discarded");
            }
        }
        Ok(())
    }

    pub async fn sync(&self, entity: EntityKind, direction: SyncDirection) -> SyncOutcome {
        self.orchestrator(entity).sync_with_server(direction).await
    }

    /// Syncs every entity kind in turn, categories first.
    pub async fn sync_all(&self, direction: SyncDirection) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::with_capacity(2);
        for orchestrator in self.orchestrators() {
            outcomes.push(orchestrator.sync_with_server(direction).await);
        }
        outcomes
    }
}

#[cfg(feature = "desktop-shims")]
mod desktop {
    use super::{CoreDependencies, SyncService};
    use anyhow::Context;
    use bridge_desktop::{
        default_data_dir, HttpTransport, KeyringSecureStore, ReqwestHttpClient,
        SqliteSettingsStore, TransportSettings,
    };
    use bridge_traits::http::RetryPolicy;
    use core_runtime::config::CoreConfig;
    use core_runtime::logging::init_logging;
    use std::sync::Arc;
    use tracing::debug;

    /// Convenience bootstrapper for desktop hosts.
    ///
    /// Installs logging, builds the reqwest transport, the keychain store and
    /// the SQLite settings store, then constructs and starts the service.
    pub async fn bootstrap_desktop(config: CoreConfig) -> anyhow::Result<SyncService> {
        if let Err(e) = init_logging(config.logging.clone()) {
            debug!(error = %e, "Logging already initialized");
        }

        let client = ReqwestHttpClient::with_timeout(config.request_timeout)
            .context("creating HTTP client")?;
        let transport = HttpTransport::new(
            Arc::new(client),
            TransportSettings {
                server_base_url: config.server_base_url.clone(),
                request_timeout: config.request_timeout,
                retry: RetryPolicy::new(config.max_retries, config.retry_base_delay),
            },
        );

        let settings_path = default_data_dir().join("settings.db");
        let settings = SqliteSettingsStore::new(settings_path.clone())
            .await
            .with_context(|| format!("opening settings store at {}", settings_path.display()))?;

        let deps = CoreDependencies::new(Arc::new(transport), Arc::new(KeyringSecureStore::new()))
            .with_settings_store(Arc::new(settings));
        let service = SyncService::new(deps, config)
            .await
            .context("initializing sync service")?;
        service.start().await;
        Ok(service)
    }
}
