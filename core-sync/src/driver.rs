//! Per-entity sync drivers
//!
//! A driver knows how one record family talks to its endpoint and to the
//! local store. The orchestrator's state machine composes over
//! [`EntitySyncDriver`] and never sees todos or categories directly.

use crate::batch::PushSummary;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::network::{RequestConfig, RequestKind, Transport};
use core_library::{
    CategoryRepository, CategoryWire, ConflictPolicy, ImportSource, ImportSummary, RecordVersion,
    SyncRecord, SyncState, TodoRepository, TodoWire,
};
use core_runtime::events::EntityKind;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A locally pending record, already in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    /// The local version `payload` was built from.
    pub version: RecordVersion,
    pub payload: Value,
}

impl PendingRecord {
    pub fn uuid(&self) -> Uuid {
        self.version.uuid
    }

    pub fn state(&self) -> SyncState {
        self.version.state
    }
}

/// Capability set the orchestrator needs from one record family.
#[async_trait]
pub trait EntitySyncDriver: Send + Sync {
    fn entity(&self) -> EntityKind;

    /// Endpoint path, e.g. `/todos`. Empty disables sync.
    fn api_endpoint(&self) -> &str;

    /// Download the server's records and merge them into the local store.
    async fn fetch(&self) -> Result<ImportSummary>;

    /// Records whose sync state is not `Synced`, in store order.
    async fn load_pending(&self) -> Result<Vec<PendingRecord>>;

    /// Upload one batch in a single request.
    async fn push(&self, batch: &[PendingRecord]) -> Result<PushSummary>;

    /// Record the server's acknowledgment of the pushed versions. Returns
    /// how many still matched the local rows.
    async fn confirm_synced(&self, versions: &[RecordVersion]) -> Result<u64>;
}

/// Request identities for an entity's fetch and push calls.
pub fn request_kinds(entity: EntityKind) -> (RequestKind, RequestKind) {
    match entity {
        EntityKind::Todo => (RequestKind::FetchTodos, RequestKind::PushTodos),
        EntityKind::Category => (RequestKind::FetchCategories, RequestKind::PushCategories),
    }
}

/// Per-request transport settings shared by the drivers.
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

/// The HTTP half shared by every driver.
struct RemoteEndpoint {
    entity: EntityKind,
    transport: Arc<dyn Transport>,
    endpoint: String,
    settings: RequestSettings,
}

impl RemoteEndpoint {
    fn configure(&self, config: RequestConfig) -> RequestConfig {
        config
            .timeout(self.settings.timeout)
            .max_retries(self.settings.max_retries)
    }

    /// GET the endpoint and return the entity's record array.
    async fn fetch_items(&self) -> Result<Vec<Value>> {
        let (kind, _) = request_kinds(self.entity);
        let url = self.transport.api_url(&self.endpoint);
        let response = self
            .transport
            .send(kind, self.configure(RequestConfig::get(url)))
            .await?;

        match response {
            Value::Array(items) => Ok(items),
            Value::Object(mut obj) => match obj.remove(self.entity.key()) {
                Some(Value::Array(items)) => Ok(items),
                Some(Value::Null) | None => Err(SyncError::InvalidResponse(format!(
                    "fetch response has no '{}' array",
                    self.entity.key()
                ))),
                Some(_) => Err(SyncError::InvalidResponse(format!(
                    "'{}' is not an array",
                    self.entity.key()
                ))),
            },
            _ => Err(SyncError::InvalidResponse(
                "fetch response is not an object".into(),
            )),
        }
    }

    /// POST `{ "<key>": [...] }` and parse the summary.
    async fn push_items(&self, batch: &[PendingRecord]) -> Result<PushSummary> {
        let (_, kind) = request_kinds(self.entity);
        let url = self.transport.api_url(&self.endpoint);
        let payloads: Vec<Value> = batch.iter().map(|r| r.payload.clone()).collect();
        let mut body = Map::new();
        body.insert(self.entity.key().to_string(), Value::Array(payloads));

        let response = self
            .transport
            .send(kind, self.configure(RequestConfig::post(url, Value::Object(body))))
            .await?;
        PushSummary::parse(&response)
    }
}

fn to_payload<T: serde::Serialize>(wire: T) -> Result<Value> {
    serde_json::to_value(wire)
        .map_err(|e| SyncError::InvalidResponse(format!("failed to encode record: {e}")))
}

// =============================================================================
// Todos
// =============================================================================

pub struct TodoSyncDriver {
    remote: RemoteEndpoint,
    store: Arc<dyn TodoRepository>,
}

impl TodoSyncDriver {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TodoRepository>,
        endpoint: impl Into<String>,
        settings: RequestSettings,
    ) -> Self {
        Self {
            remote: RemoteEndpoint {
                entity: EntityKind::Todo,
                transport,
                endpoint: endpoint.into(),
                settings,
            },
            store,
        }
    }
}

#[async_trait]
impl EntitySyncDriver for TodoSyncDriver {
    fn entity(&self) -> EntityKind {
        EntityKind::Todo
    }

    fn api_endpoint(&self) -> &str {
        &self.remote.endpoint
    }

    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<ImportSummary> {
        let items = self.remote.fetch_items().await?;
        debug!(count = items.len(), "Fetched todos");
        let summary = self
            .store
            .import_from_remote(&items, ImportSource::Server, ConflictPolicy::Merge)
            .await?;
        Ok(summary)
    }

    async fn load_pending(&self) -> Result<Vec<PendingRecord>> {
        self.store
            .load_pending()
            .await?
            .iter()
            .map(|todo| {
                Ok(PendingRecord {
                    version: todo.version(),
                    payload: to_payload(TodoWire::from(todo))?,
                })
            })
            .collect()
    }

    async fn push(&self, batch: &[PendingRecord]) -> Result<PushSummary> {
        self.remote.push_items(batch).await
    }

    async fn confirm_synced(&self, versions: &[RecordVersion]) -> Result<u64> {
        Ok(self.store.mark_synced(versions).await?)
    }
}

// =============================================================================
// Categories
// =============================================================================

pub struct CategorySyncDriver {
    remote: RemoteEndpoint,
    store: Arc<dyn CategoryRepository>,
}

impl CategorySyncDriver {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CategoryRepository>,
        endpoint: impl Into<String>,
        settings: RequestSettings,
    ) -> Self {
        Self {
            remote: RemoteEndpoint {
                entity: EntityKind::Category,
                transport,
                endpoint: endpoint.into(),
                settings,
            },
            store,
        }
    }
}

#[async_trait]
impl EntitySyncDriver for CategorySyncDriver {
    fn entity(&self) -> EntityKind {
        EntityKind::Category
    }

    fn api_endpoint(&self) -> &str {
        &self.remote.endpoint
    }

    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<ImportSummary> {
        let items = self.remote.fetch_items().await?;
        debug!(count = items.len(), "Fetched categories");
        let summary = self
            .store
            .import_from_remote(&items, ImportSource::Server, ConflictPolicy::Merge)
            .await?;
        Ok(summary)
    }

    async fn load_pending(&self) -> Result<Vec<PendingRecord>> {
        self.store
            .load_pending()
            .await?
            .iter()
            .map(|category| {
                Ok(PendingRecord {
                    version: category.version(),
                    payload: to_payload(CategoryWire::from(category))?,
                })
            })
            .collect()
    }

    async fn push(&self, batch: &[PendingRecord]) -> Result<PushSummary> {
        self.remote.push_items(batch).await
    }

    async fn confirm_synced(&self, versions: &[RecordVersion]) -> Result<u64> {
        Ok(self.store.mark_synced(versions).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::network::TransportError;
    use core_library::{create_test_pool, NewTodo, SqliteTodoRepository};
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns one canned response and records the request.
    struct CannedTransport {
        response: Mutex<Option<std::result::Result<Value, TransportError>>>,
        requests: Mutex<Vec<(RequestKind, RequestConfig)>>,
    }

    impl CannedTransport {
        fn new(response: std::result::Result<Value, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn send(
            &self,
            kind: RequestKind,
            config: RequestConfig,
        ) -> std::result::Result<Value, TransportError> {
            self.requests.lock().unwrap().push((kind, config));
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(TransportError::unknown("no response scripted")))
        }

        fn server_base_url(&self) -> String {
            "https://api.example.com".to_string()
        }

        fn set_auth_token(&self, _token: Option<String>) {}
    }

    async fn driver(transport: Arc<CannedTransport>) -> (TodoSyncDriver, Arc<SqliteTodoRepository>) {
        let store = Arc::new(SqliteTodoRepository::new(create_test_pool().await.unwrap()));
        let driver = TodoSyncDriver::new(transport, store.clone(), "/todos", RequestSettings::default());
        (driver, store)
    }

    #[tokio::test]
    async fn test_fetch_imports_as_synced() {
        let user = Uuid::new_v4();
        let transport = CannedTransport::new(Ok(json!({
            "todos": [ {"uuid": Uuid::new_v4().to_string(), "user_uuid": user.to_string(), "title": "From server"} ]
        })));
        let (driver, store) = driver(transport.clone()).await;

        let summary = driver.fetch().await.unwrap();
        assert_eq!(summary.inserted, 1);

        let all = store.load_all().await.unwrap();
        assert_eq!(all[0].synced, SyncState::Synced);

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].0, RequestKind::FetchTodos);
        assert_eq!(requests[0].1.url, "https://api.example.com/todos");
        assert!(requests[0].1.body.is_none());
        assert!(requests[0].1.requires_auth);
    }

    #[tokio::test]
    async fn test_fetch_without_entity_array_is_invalid() {
        let transport = CannedTransport::new(Ok(json!({"categories": []})));
        let (driver, _) = driver(transport).await;
        assert!(matches!(
            driver.fetch().await,
            Err(SyncError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_push_body_uses_entity_key() {
        let transport = CannedTransport::new(Ok(json!({"summary": {"created": 1}})));
        let (driver, store) = driver(transport.clone()).await;
        store
            .insert(NewTodo::new(Uuid::new_v4(), "Upload me"))
            .await
            .unwrap();

        let pending = driver.load_pending().await.unwrap();
        assert_eq!(pending[0].state(), SyncState::PendingInsert);

        let summary = driver.push(&pending).await.unwrap();
        assert_eq!(summary.created, 1);

        let requests = transport.requests.lock().unwrap();
        let (kind, config) = &requests[0];
        assert_eq!(*kind, RequestKind::PushTodos);
        let body = config.body.as_ref().unwrap();
        assert_eq!(body["todos"].as_array().unwrap().len(), 1);
        assert_eq!(body["todos"][0]["title"], json!("Upload me"));
        assert_eq!(body["todos"][0]["synced"], json!(1));
    }
}
