use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::network::{RequestConfig, RequestKind, Transport, TransportError};
use bridge_traits::storage::SettingsStore;
use bridge_traits::time::ManualClock;
use chrono::{TimeZone, Utc};
use core_auth::CredentialProvider;
use core_library::{
    create_test_pool, ImportSummary, NewTodo, RecordVersion, SqliteTodoRepository, SyncState,
    TodoPatch, TodoRepository,
};
use core_runtime::events::{CoreEvent, EntityKind, EventBus, SyncDirection, SyncEvent, SyncResult};
use core_sync::{
    EntitySyncDriver, OrchestratorSettings, PendingRecord, PushSummary, RequestSettings,
    SessionState, SyncOrchestrator, TodoSyncDriver,
};
use mockall::mock;
use serde_json::{json, Value};
use tokio::sync::broadcast::Receiver;
use tokio::sync::Notify;
use uuid::Uuid;

type Scripted = std::result::Result<Value, TransportError>;

/// Transport fake answering from per-kind queues and recording every call.
///
/// Unscripted fetches return an empty list and unscripted pushes accept the
/// whole batch.
struct SpyTransport {
    base_url: String,
    responses: Mutex<HashMap<RequestKind, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(RequestKind, RequestConfig)>>,
    hold: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl SpyTransport {
    fn new(base_url: &str) -> Arc<Self> {
        Arc::new(Self {
            base_url: base_url.to_string(),
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            hold: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    fn script(&self, kind: RequestKind, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(response);
    }

    fn kinds(&self) -> Vec<RequestKind> {
        self.calls.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }

    fn pushed_batches(&self) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == RequestKind::PushTodos)
            .map(|(_, c)| c.body.as_ref().unwrap()["todos"].as_array().unwrap().clone())
            .collect()
    }
}

#[async_trait]
impl Transport for SpyTransport {
    async fn send(&self, kind: RequestKind, config: RequestConfig) -> Scripted {
        self.calls.lock().unwrap().push((kind, config));
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| match kind {
            RequestKind::FetchTodos => Ok(json!({"todos": []})),
            RequestKind::PushTodos => Ok(json!({"summary": {}})),
            _ => Err(TransportError::unknown("unscripted request")),
        })
    }

    fn server_base_url(&self) -> String {
        self.base_url.clone()
    }

    fn set_auth_token(&self, _token: Option<String>) {}
}

mock! {
    Credentials {}

    #[async_trait]
    impl CredentialProvider for Credentials {
        async fn is_authenticated(&self) -> bool;
        async fn access_token(&self) -> Option<String>;
        async fn user_uuid(&self) -> Option<Uuid>;
        async fn handle_auth_failure(&self) -> bool;
    }
}

fn signed_in() -> Arc<MockCredentials> {
    let mut credentials = MockCredentials::new();
    credentials.expect_is_authenticated().return_const(true);
    credentials.expect_handle_auth_failure().never();
    Arc::new(credentials)
}

#[derive(Default)]
struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set_i64(&self, key: &str, value: i64) -> BridgeResult<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_i64(&self, key: &str) -> BridgeResult<Option<i64>> {
        Ok(self
            .get_string(key)
            .await?
            .and_then(|v| v.parse().ok()))
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }

    async fn clear_all(&self) -> BridgeResult<()> {
        self.values.lock().unwrap().clear();
        Ok(())
    }
}

struct Harness {
    orchestrator: SyncOrchestrator,
    transport: Arc<SpyTransport>,
    store: Arc<SqliteTodoRepository>,
    events: Receiver<CoreEvent>,
}

async fn harness_with(
    transport: Arc<SpyTransport>,
    credentials: Arc<MockCredentials>,
    endpoint: &str,
    settings: OrchestratorSettings,
) -> Harness {
    let store = Arc::new(SqliteTodoRepository::new(create_test_pool().await.unwrap()));
    let driver = Arc::new(TodoSyncDriver::new(
        transport.clone(),
        store.clone(),
        endpoint,
        RequestSettings::default(),
    ));
    let event_bus = EventBus::new(256);
    let events = event_bus.subscribe();
    let orchestrator = SyncOrchestrator::builder(driver, transport.clone(), credentials, event_bus)
        .settings(settings)
        .build();
    Harness {
        orchestrator,
        transport,
        store,
        events,
    }
}

async fn harness() -> Harness {
    harness_with(
        SpyTransport::new("https://api.example.com"),
        signed_in(),
        "/todos",
        OrchestratorSettings::default(),
    )
    .await
}

async fn seed_pending(store: &SqliteTodoRepository, count: usize) -> Vec<Uuid> {
    let user = Uuid::new_v4();
    let mut uuids = Vec::with_capacity(count);
    for i in 0..count {
        let todo = store
            .insert(NewTodo::new(user, format!("Todo {i}")))
            .await
            .unwrap();
        uuids.push(todo.uuid);
    }
    uuids
}

fn drain(events: &mut Receiver<CoreEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(event) = event {
            out.push(event);
        }
    }
    out
}

fn completions(events: &[SyncEvent]) -> Vec<SyncResult> {
    events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Completed { result, .. } => Some(*result),
            _ => None,
        })
        .collect()
}

fn progress(events: &[SyncEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_rejected_items_stay_pending() {
    let mut h = harness().await;
    let uuids = seed_pending(&h.store, 10).await;
    h.transport.script(
        RequestKind::PushTodos,
        Ok(json!({
            "summary": {
                "created": 8,
                "errors": [ {"index": 2, "error": "title too long"} ],
                "conflicts": [ {"index": 5, "reason": "stale"} ]
            }
        })),
    );

    let outcome = h.orchestrator.sync_with_server(SyncDirection::UploadOnly).await;
    assert!(outcome.is_success(), "{}", outcome.message);

    let pending: Vec<Uuid> = h
        .store
        .load_pending()
        .await
        .unwrap()
        .iter()
        .map(|t| t.uuid)
        .collect();
    assert_eq!(pending, vec![uuids[2], uuids[5]]);

    let events = drain(&mut h.events);
    let uploaded = events.iter().find_map(|e| match e {
        SyncEvent::LocalChangesUploaded { uuids, .. } => Some(uuids.len()),
        _ => None,
    });
    assert_eq!(uploaded, Some(8));
}

#[tokio::test]
async fn test_empty_push_response_confirms_batch() {
    let mut h = harness().await;
    seed_pending(&h.store, 4).await;
    h.transport.script(RequestKind::PushTodos, Ok(Value::Null));

    let outcome = h.orchestrator.sync_with_server(SyncDirection::UploadOnly).await;
    assert!(outcome.is_success(), "{}", outcome.message);
    assert_eq!(h.store.count_pending().await.unwrap(), 0);
    assert_eq!(completions(&drain(&mut h.events)), vec![SyncResult::Success]);
}

#[tokio::test]
async fn test_partial_batch_failure_resumes_with_remainder() {
    let mut h = harness().await;
    let uuids = seed_pending(&h.store, 150).await;
    h.transport
        .script(RequestKind::PushTodos, Ok(json!({"summary": {"created": 100}})));
    h.transport.script(
        RequestKind::PushTodos,
        Err(TransportError::connection("connection reset")),
    );

    let outcome = h.orchestrator.sync_with_server(SyncDirection::UploadOnly).await;
    assert_eq!(outcome.result, SyncResult::NetworkError);
    assert!(!h.orchestrator.is_syncing());

    let batches = h.transport.pushed_batches();
    assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![100, 50]);

    let pending: Vec<Uuid> = h
        .store
        .load_pending()
        .await
        .unwrap()
        .iter()
        .map(|t| t.uuid)
        .collect();
    assert_eq!(pending, uuids[100..].to_vec());

    let events = drain(&mut h.events);
    assert_eq!(progress(&events), vec![75, 85]);
    assert_eq!(completions(&events), vec![SyncResult::NetworkError]);

    let outcome = h.orchestrator.sync_with_server(SyncDirection::UploadOnly).await;
    assert!(outcome.is_success());
    let batches = h.transport.pushed_batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[2].len(), 50);
    assert_eq!(batches[2][0]["uuid"], json!(uuids[100].to_string()));
    assert_eq!(h.store.count_pending().await.unwrap(), 0);
}

/// Starts an upload that blocks inside the transport until released.
async fn held_upload(h: &Harness) -> tokio::task::JoinHandle<core_sync::SyncOutcome> {
    h.transport.hold.store(true, Ordering::SeqCst);
    let running = h.orchestrator.clone();
    let handle =
        tokio::spawn(async move { running.sync_with_server(SyncDirection::UploadOnly).await });
    h.transport.entered.notified().await;
    handle
}

fn release(h: &Harness) {
    h.transport.hold.store(false, Ordering::SeqCst);
    h.transport.release.notify_one();
}

#[tokio::test]
async fn test_edit_during_push_is_uploaded_next_cycle() {
    let h = harness().await;
    let uuid = seed_pending(&h.store, 1).await[0];
    assert!(h.orchestrator.sync_with_server(SyncDirection::UploadOnly).await.is_success());
    h.store
        .update(uuid, &TodoPatch::new().title("v1"))
        .await
        .unwrap();

    let upload = held_upload(&h).await;
    h.store
        .update(uuid, &TodoPatch::new().title("v2"))
        .await
        .unwrap();
    release(&h);
    assert!(upload.await.unwrap().is_success());

    let batches = h.transport.pushed_batches();
    assert_eq!(batches[1][0]["title"], json!("v1"));
    let local = h.store.find_by_uuid(uuid).await.unwrap().unwrap();
    assert_eq!(local.title, "v2");
    assert_eq!(local.synced, SyncState::PendingUpdate);

    assert!(h.orchestrator.sync_with_server(SyncDirection::UploadOnly).await.is_success());
    let batches = h.transport.pushed_batches();
    assert_eq!(batches[2][0]["title"], json!("v2"));
    let local = h.store.find_by_uuid(uuid).await.unwrap().unwrap();
    assert_eq!(local.synced, SyncState::Synced);
}

#[tokio::test]
async fn test_delete_during_push_is_not_lost() {
    let h = harness().await;
    let uuid = seed_pending(&h.store, 1).await[0];
    assert!(h.orchestrator.sync_with_server(SyncDirection::UploadOnly).await.is_success());
    h.store
        .update(uuid, &TodoPatch::new().important(true))
        .await
        .unwrap();

    let upload = held_upload(&h).await;
    h.store.soft_delete(uuid).await.unwrap();
    release(&h);
    assert!(upload.await.unwrap().is_success());

    let local = h.store.find_by_uuid(uuid).await.unwrap().unwrap();
    assert_eq!(local.synced, SyncState::PendingDelete);

    assert!(h.orchestrator.sync_with_server(SyncDirection::UploadOnly).await.is_success());
    let batches = h.transport.pushed_batches();
    assert_eq!(batches[2][0]["synced"], json!(SyncState::PendingDelete.as_i64()));
    assert!(h.store.find_by_uuid(uuid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_single_flight_rejects_concurrent_call() {
    let mut h = harness().await;
    seed_pending(&h.store, 3).await;
    h.transport.hold.store(true, Ordering::SeqCst);

    let running = h.orchestrator.clone();
    let first = tokio::spawn(async move { running.sync_with_server(SyncDirection::UploadOnly).await });
    h.transport.entered.notified().await;
    assert_eq!(
        h.orchestrator.state(),
        SessionState::Syncing(SyncDirection::UploadOnly)
    );

    let second = h
        .orchestrator
        .sync_with_server(SyncDirection::DownloadOnly)
        .await;
    assert_eq!(second.result, SyncResult::UnknownError);
    assert_eq!(second.message, "sync already in progress for todos");

    h.transport.hold.store(false, Ordering::SeqCst);
    h.transport.release.notify_one();
    let first = first.await.unwrap();
    assert!(first.is_success());

    let events = drain(&mut h.events);
    let started = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::Started { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(
        completions(&events),
        vec![SyncResult::UnknownError, SyncResult::Success]
    );
    assert_eq!(h.transport.kinds(), vec![RequestKind::PushTodos]);
}

#[tokio::test]
async fn test_cancel_returns_to_idle() {
    let mut h = harness().await;
    seed_pending(&h.store, 5).await;
    h.transport.hold.store(true, Ordering::SeqCst);

    let running = h.orchestrator.clone();
    let task = tokio::spawn(async move { running.sync_with_server(SyncDirection::UploadOnly).await });
    h.transport.entered.notified().await;

    assert!(h.orchestrator.cancel());
    assert!(!h.orchestrator.is_syncing());
    assert!(!h.orchestrator.cancel());

    let outcome = task.await.unwrap();
    assert_eq!(outcome.result, SyncResult::UnknownError);
    assert_eq!(outcome.message, "sync cancelled");
    assert_eq!(h.store.count_pending().await.unwrap(), 5);

    let events = drain(&mut h.events);
    assert_eq!(completions(&events), vec![SyncResult::UnknownError]);
}

#[tokio::test]
async fn test_unconfigured_server_is_rejected_without_requests() {
    let mut h = harness_with(
        SpyTransport::new(""),
        signed_in(),
        "/todos",
        OrchestratorSettings::default(),
    )
    .await;

    let outcome = h.orchestrator.sync_with_server(SyncDirection::Bidirectional).await;
    assert_eq!(outcome.result, SyncResult::UnknownError);
    assert!(h.transport.kinds().is_empty());

    let events = drain(&mut h.events);
    assert!(!events.iter().any(|e| matches!(e, SyncEvent::Started { .. })));
    assert_eq!(completions(&events), vec![SyncResult::UnknownError]);
}

#[tokio::test]
async fn test_empty_endpoint_is_rejected() {
    let h = harness_with(
        SpyTransport::new("https://api.example.com"),
        signed_in(),
        "",
        OrchestratorSettings::default(),
    )
    .await;

    let outcome = h.orchestrator.sync_with_server(SyncDirection::DownloadOnly).await;
    assert_eq!(outcome.result, SyncResult::UnknownError);
    assert!(h.transport.kinds().is_empty());
}

#[tokio::test]
async fn test_signed_out_is_auth_error() {
    let mut credentials = MockCredentials::new();
    credentials.expect_is_authenticated().return_const(false);
    let h = harness_with(
        SpyTransport::new("https://api.example.com"),
        Arc::new(credentials),
        "/todos",
        OrchestratorSettings::default(),
    )
    .await;

    let outcome = h.orchestrator.sync_with_server(SyncDirection::Bidirectional).await;
    assert_eq!(outcome.result, SyncResult::AuthError);
    assert!(h.transport.kinds().is_empty());
}

#[tokio::test]
async fn test_server_auth_rejection_triggers_refresh() {
    let mut credentials = MockCredentials::new();
    credentials.expect_is_authenticated().return_const(true);
    credentials
        .expect_handle_auth_failure()
        .times(1)
        .return_const(true);
    let h = harness_with(
        SpyTransport::new("https://api.example.com"),
        Arc::new(credentials),
        "/todos",
        OrchestratorSettings::default(),
    )
    .await;
    h.transport.script(
        RequestKind::FetchTodos,
        Err(TransportError::authentication("token expired").with_status(401)),
    );

    let outcome = h.orchestrator.sync_with_server(SyncDirection::DownloadOnly).await;
    assert_eq!(outcome.result, SyncResult::AuthError);
    assert!(outcome.message.contains("renewed"));
    assert!(!h.orchestrator.is_syncing());
}

#[tokio::test]
async fn test_whole_push_conflict_reports_conflict_error() {
    let h = harness().await;
    seed_pending(&h.store, 2).await;
    h.transport.script(
        RequestKind::PushTodos,
        Err(TransportError::unknown("conflict").with_status(409)),
    );

    let outcome = h.orchestrator.sync_with_server(SyncDirection::UploadOnly).await;
    assert_eq!(outcome.result, SyncResult::ConflictError);
    assert_eq!(h.store.count_pending().await.unwrap(), 2);
}

#[tokio::test]
async fn test_bidirectional_pushes_first_when_pending() {
    let h = harness().await;
    seed_pending(&h.store, 2).await;

    let outcome = h.orchestrator.sync_with_server(SyncDirection::Bidirectional).await;
    assert!(outcome.is_success());
    assert_eq!(
        h.transport.kinds(),
        vec![RequestKind::PushTodos, RequestKind::FetchTodos]
    );
}

#[tokio::test]
async fn test_bidirectional_fetch_first_refetches_after_push() {
    let settings = OrchestratorSettings {
        push_first_when_pending: false,
        ..OrchestratorSettings::default()
    };
    let h = harness_with(
        SpyTransport::new("https://api.example.com"),
        signed_in(),
        "/todos",
        settings,
    )
    .await;
    seed_pending(&h.store, 2).await;

    h.orchestrator.sync_with_server(SyncDirection::Bidirectional).await;
    assert_eq!(
        h.transport.kinds(),
        vec![
            RequestKind::FetchTodos,
            RequestKind::PushTodos,
            RequestKind::FetchTodos
        ]
    );
}

#[tokio::test]
async fn test_bidirectional_without_pending_only_fetches() {
    let mut h = harness().await;
    let user = Uuid::new_v4();
    h.transport.script(
        RequestKind::FetchTodos,
        Ok(json!({
            "todos": [
                {"uuid": Uuid::new_v4().to_string(), "user_uuid": user.to_string(), "title": "Remote"}
            ]
        })),
    );

    let outcome = h.orchestrator.sync_with_server(SyncDirection::Bidirectional).await;
    assert!(outcome.is_success());
    assert_eq!(h.transport.kinds(), vec![RequestKind::FetchTodos]);

    let all = h.store.load_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].synced, SyncState::Synced);

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::RemoteChangesApplied { inserted: 1, .. }
    )));
    assert_eq!(progress(&events), vec![25, 50, 100]);
}

#[tokio::test]
async fn test_last_sync_time_is_persisted() {
    let transport = SpyTransport::new("https://api.example.com");
    let store = Arc::new(SqliteTodoRepository::new(create_test_pool().await.unwrap()));
    let settings_store = Arc::new(MemorySettings::default());
    let synced_at = Utc.with_ymd_and_hms(2026, 5, 4, 12, 30, 0).unwrap();
    let clock = Arc::new(ManualClock::new(synced_at));

    let build = || {
        let driver = Arc::new(TodoSyncDriver::new(
            transport.clone(),
            store.clone(),
            "/todos",
            RequestSettings::default(),
        ));
        SyncOrchestrator::builder(driver, transport.clone(), signed_in(), EventBus::new(16))
            .clock(clock.clone())
            .settings_store(settings_store.clone())
            .build()
    };

    let orchestrator = build();
    assert!(orchestrator.last_sync_time().is_none());
    orchestrator
        .sync_with_server(SyncDirection::DownloadOnly)
        .await;
    assert_eq!(orchestrator.last_sync_time(), Some(synced_at));
    assert!(settings_store
        .get_string("sync.todos.last_sync_time")
        .await
        .unwrap()
        .is_some());

    let restarted = build();
    assert_eq!(restarted.restore_last_sync_time().await, Some(synced_at));
    assert_eq!(restarted.last_sync_time(), Some(synced_at));
}

#[tokio::test]
async fn test_failed_sync_keeps_last_sync_time() {
    let h = harness().await;
    h.transport.script(
        RequestKind::FetchTodos,
        Err(TransportError::timeout("timed out")),
    );

    let outcome = h.orchestrator.sync_with_server(SyncDirection::DownloadOnly).await;
    assert_eq!(outcome.result, SyncResult::NetworkError);
    assert!(h.orchestrator.last_sync_time().is_none());
}

/// In-memory driver for timer tests, free of database I/O.
#[derive(Default)]
struct CountingDriver {
    fetches: AtomicUsize,
}

#[async_trait]
impl EntitySyncDriver for CountingDriver {
    fn entity(&self) -> EntityKind {
        EntityKind::Category
    }

    fn api_endpoint(&self) -> &str {
        "/categories"
    }

    async fn fetch(&self) -> core_sync::Result<ImportSummary> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(ImportSummary::default())
    }

    async fn load_pending(&self) -> core_sync::Result<Vec<PendingRecord>> {
        Ok(Vec::new())
    }

    async fn push(&self, _batch: &[PendingRecord]) -> core_sync::Result<PushSummary> {
        Ok(PushSummary::default())
    }

    async fn confirm_synced(&self, versions: &[RecordVersion]) -> core_sync::Result<u64> {
        Ok(versions.len() as u64)
    }
}

#[tokio::test(start_paused = true)]
async fn test_auto_sync_runs_on_interval() {
    let driver = Arc::new(CountingDriver::default());
    let settings = OrchestratorSettings {
        auto_sync_interval: Duration::from_secs(60),
        ..OrchestratorSettings::default()
    };
    let orchestrator = SyncOrchestrator::builder(
        driver.clone(),
        SpyTransport::new("https://api.example.com"),
        signed_in(),
        EventBus::new(64),
    )
    .settings(settings)
    .build();

    assert!(orchestrator.start_auto_sync());
    assert!(orchestrator.is_auto_sync_running());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(driver.fetches.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(driver.fetches.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(driver.fetches.load(Ordering::SeqCst), 2);

    orchestrator.stop_auto_sync();
    assert!(!orchestrator.is_auto_sync_running());
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(driver.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_disables_auto_sync() {
    let settings = OrchestratorSettings {
        auto_sync_interval: Duration::ZERO,
        ..OrchestratorSettings::default()
    };
    let orchestrator = SyncOrchestrator::builder(
        Arc::new(CountingDriver::default()),
        SpyTransport::new("https://api.example.com"),
        signed_in(),
        EventBus::new(16),
    )
    .settings(settings)
    .build();

    assert!(!orchestrator.start_auto_sync());
    assert!(!orchestrator.is_auto_sync_running());
}
