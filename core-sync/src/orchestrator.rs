//! # Sync Orchestrator
//!
//! The state machine that decides when and in which direction one entity
//! kind syncs, and drives fetch → reconcile → push → re-fetch.
//!
//! ## Overview
//!
//! One `SyncOrchestrator` exists per [`EntityKind`]. It owns at most one
//! [`SyncSession`](crate::session) at a time: a `sync_with_server` call while
//! a session is active is rejected, never queued. Every call, accepted or
//! not, ends with exactly one `SyncEvent::Completed` on the event bus.
//!
//! ## Workflow
//!
//! ### Bidirectional
//! 1. If local changes are pending and push-first is enabled: push, then fetch
//! 2. Otherwise: fetch and reconcile, push pending records, then re-fetch
//!    once if anything was sent
//!
//! ### UploadOnly / DownloadOnly
//! Push only, or fetch only.
//!
//! ### Pushing
//! Pending records are split into batches of at most `max_batch_size` and
//! sent one request at a time. Items the server rejects by index stay
//! pending; the rest are confirmed. A failed request stops the cycle and
//! leaves every unconfirmed record untouched for the next attempt.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = SyncOrchestrator::builder(driver, transport, credentials, event_bus)
//!     .settings(OrchestratorSettings::from_config(&config))
//!     .build();
//!
//! let outcome = orchestrator.sync_with_server(SyncDirection::Bidirectional).await;
//! println!("{:?}: {}", outcome.result, outcome.message);
//! ```

use crate::batch::{batch_progress, partition};
use crate::driver::EntitySyncDriver;
use crate::error::{Result, SyncError};
use crate::session::{SessionSnapshot, SessionState, SyncPhase, SyncSession};
use bridge_traits::network::Transport;
use bridge_traits::storage::SettingsStore;
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_auth::CredentialProvider;
use core_library::{ImportSummary, RecordVersion};
use core_runtime::config::CoreConfig;
use core_runtime::events::{
    CoreEvent, EntityKind, EventBus, SyncDirection, SyncEvent, SyncResult,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Orchestrator tuning taken from [`CoreConfig`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_batch_size: usize,
    /// In bidirectional mode, push before fetching when local changes exist.
    pub push_first_when_pending: bool,
    /// Zero disables the auto-sync timer.
    pub auto_sync_interval: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            push_first_when_pending: config.push_first_when_pending,
            auto_sync_interval: config.auto_sync_interval,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            push_first_when_pending: true,
            auto_sync_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Terminal result of one `sync_with_server` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub entity: EntityKind,
    pub result: SyncResult,
    pub message: String,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// What a push sequence did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PushReport {
    batches: usize,
    uploaded: usize,
    rejected: usize,
}

pub struct SyncOrchestratorBuilder {
    driver: Arc<dyn EntitySyncDriver>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    settings: OrchestratorSettings,
}

impl SyncOrchestratorBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist `last_sync_time` through a settings bridge.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> SyncOrchestrator {
        SyncOrchestrator {
            inner: Arc::new(Inner {
                driver: self.driver,
                transport: self.transport,
                credentials: self.credentials,
                event_bus: self.event_bus,
                clock: self.clock,
                settings_store: self.settings_store,
                settings: self.settings,
                session: Mutex::new(None),
                next_session_id: AtomicU64::new(0),
                last_sync_time: RwLock::new(None),
                auto_sync: Mutex::new(None),
            }),
        }
    }
}

/// Sync state machine for one entity kind. Cloning shares the state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    driver: Arc<dyn EntitySyncDriver>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    settings: OrchestratorSettings,
    session: Mutex<Option<SyncSession>>,
    next_session_id: AtomicU64,
    last_sync_time: RwLock<Option<DateTime<Utc>>>,
    auto_sync: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let handle = match self.auto_sync.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl SyncOrchestrator {
    pub fn builder(
        driver: Arc<dyn EntitySyncDriver>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        event_bus: EventBus,
    ) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder {
            driver,
            transport,
            credentials,
            event_bus,
            clock: Arc::new(SystemClock),
            settings_store: None,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn entity(&self) -> EntityKind {
        self.inner.driver.entity()
    }

    // =========================================================================
    // Eligibility and state
    // =========================================================================

    /// Checks every precondition for leaving `Idle`.
    ///
    /// # Errors
    ///
    /// - `AlreadySyncing` while a session is active
    /// - `NotConfigured` when the server URL or endpoint is empty
    /// - `NotAuthenticated` without an access token
    pub async fn can_sync(&self) -> Result<()> {
        if self.is_syncing() {
            return Err(SyncError::AlreadySyncing(self.entity()));
        }
        if self.inner.transport.server_base_url().trim().is_empty() {
            return Err(SyncError::NotConfigured("server base URL is empty".into()));
        }
        if self.inner.driver.api_endpoint().trim().is_empty() {
            return Err(SyncError::NotConfigured(format!(
                "{} endpoint is empty",
                self.entity()
            )));
        }
        if !self.inner.credentials.is_authenticated().await {
            return Err(SyncError::NotAuthenticated);
        }
        Ok(())
    }

    pub fn is_syncing(&self) -> bool {
        self.lock_session().is_some()
    }

    pub fn state(&self) -> SessionState {
        match self.lock_session().as_ref() {
            Some(session) => SessionState::Syncing(session.direction),
            None => SessionState::Idle,
        }
    }

    /// Snapshot of the running session, if any.
    pub fn session(&self) -> Option<SessionSnapshot> {
        self.lock_session().as_ref().map(SyncSession::snapshot)
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        match self.inner.last_sync_time.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn last_sync_key(&self) -> String {
        format!("sync.{}.last_sync_time", self.entity().key())
    }

    /// Reloads the persisted `last_sync_time`, if a settings bridge is set.
    pub async fn restore_last_sync_time(&self) -> Option<DateTime<Utc>> {
        let store = self.inner.settings_store.as_ref()?;
        let raw = match store.get_string(&self.last_sync_key()).await {
            Ok(value) => value?,
            Err(e) => {
                warn!(error = %e, "Failed to read last sync time");
                return None;
            }
        };
        let parsed = DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| warn!(error = %e, value = %raw, "Ignoring malformed last sync time"))
            .ok()?;
        self.set_last_sync_time(parsed);
        Some(parsed)
    }

    fn set_last_sync_time(&self, time: DateTime<Utc>) {
        match self.inner.last_sync_time.write() {
            Ok(mut guard) => *guard = Some(time),
            Err(poisoned) => *poisoned.into_inner() = Some(time),
        }
    }

    async fn record_sync_time(&self) {
        let now = self.inner.clock.now();
        self.set_last_sync_time(now);
        if let Some(store) = &self.inner.settings_store {
            if let Err(e) = store
                .set_string(&self.last_sync_key(), &now.to_rfc3339())
                .await
            {
                warn!(error = %e, "Failed to persist last sync time");
            }
        }
    }

    // =========================================================================
    // Session slot
    // =========================================================================

    fn lock_session(&self) -> MutexGuard<'_, Option<SyncSession>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim_session(&self, direction: SyncDirection) -> Result<(u64, CancellationToken)> {
        let mut slot = self.lock_session();
        if slot.is_some() {
            return Err(SyncError::AlreadySyncing(self.entity()));
        }
        let id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session = SyncSession::new(id, direction);
        let token = session.cancel.clone();
        *slot = Some(session);
        Ok((id, token))
    }

    fn release_session(&self, id: u64) {
        let mut slot = self.lock_session();
        if slot.as_ref().is_some_and(|s| s.id == id) {
            *slot = None;
        }
    }

    fn update_session(&self, update: impl FnOnce(&mut SyncSession)) {
        if let Some(session) = self.lock_session().as_mut() {
            update(session);
        }
    }

    /// Cancels the running cycle and returns to `Idle` immediately.
    ///
    /// Batches the server already accepted are not rolled back. The
    /// cancelled `sync_with_server` call reports the cancellation.
    pub fn cancel(&self) -> bool {
        match self.lock_session().take() {
            Some(session) => {
                info!(entity = %self.entity(), "Cancelling sync");
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Forcibly clears a stuck session.
    pub fn reset_sync_state(&self) {
        if self.cancel() {
            warn!(entity = %self.entity(), "Sync state reset while a session was active");
        }
    }

    // =========================================================================
    // Sync cycle
    // =========================================================================

    /// Runs one sync cycle and reports its terminal result.
    ///
    /// Never queues: an ineligible or concurrent call completes immediately
    /// with a failure.
    #[instrument(skip(self), fields(entity = %self.entity(), direction = %direction))]
    pub async fn sync_with_server(&self, direction: SyncDirection) -> SyncOutcome {
        if let Err(e) = self.can_sync().await {
            debug!(reason = %e, "Sync not started");
            return self.complete(Err(e)).await;
        }

        let (id, cancel) = match self.claim_session(direction) {
            Ok(claimed) => claimed,
            Err(e) => return self.complete(Err(e)).await,
        };

        info!("Sync started");
        self.emit(SyncEvent::Started {
            entity: self.entity(),
            direction,
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = self.run_cycle(direction) => result,
        };
        self.release_session(id);

        self.complete(result).await
    }

    async fn run_cycle(&self, direction: SyncDirection) -> Result<String> {
        match direction {
            SyncDirection::DownloadOnly => {
                let applied = self.fetch_phase(SyncPhase::Fetching).await?;
                Ok(format!(
                    "download complete: {} inserted, {} updated, {} skipped",
                    applied.inserted, applied.updated, applied.skipped
                ))
            }
            SyncDirection::UploadOnly => {
                let report = self.push_phase().await?;
                Ok(push_message(&report))
            }
            SyncDirection::Bidirectional => {
                let has_pending = !self.inner.driver.load_pending().await?.is_empty();
                if has_pending && self.inner.settings.push_first_when_pending {
                    debug!("Local changes pending; pushing before fetch");
                    self.push_phase().await?;
                    self.fetch_phase(SyncPhase::Fetching).await?;
                } else {
                    self.fetch_phase(SyncPhase::Fetching).await?;
                    let report = self.push_phase().await?;
                    if report.batches > 0 {
                        self.fetch_phase(SyncPhase::Refetching).await?;
                    }
                }
                Ok("sync complete".to_string())
            }
        }
    }

    async fn fetch_phase(&self, phase: SyncPhase) -> Result<ImportSummary> {
        self.update_session(|s| s.phase = Some(phase));
        let report_progress = phase == SyncPhase::Fetching;
        if report_progress {
            self.progress(25, "fetching from server");
        }

        let applied = self.inner.driver.fetch().await?;
        debug!(
            inserted = applied.inserted,
            updated = applied.updated,
            skipped = applied.skipped,
            "Remote changes applied"
        );
        self.emit(SyncEvent::RemoteChangesApplied {
            entity: self.entity(),
            inserted: applied.inserted,
            updated: applied.updated,
            skipped: applied.skipped,
        });

        if report_progress {
            self.progress(50, "server changes applied");
        }
        Ok(applied)
    }

    async fn push_phase(&self) -> Result<PushReport> {
        let pending = self.inner.driver.load_pending().await?;
        if pending.is_empty() {
            debug!("Nothing to push");
            return Ok(PushReport::default());
        }

        let pending_count = pending.len();
        let batches = partition(pending, self.inner.settings.max_batch_size);
        let total = batches.len();
        self.update_session(|s| {
            s.phase = Some(SyncPhase::Pushing);
            s.pending_count = pending_count;
            s.current_batch = 0;
            s.total_batches = total;
        });
        info!(pending = pending_count, batches = total, "Pushing local changes");
        self.progress(batch_progress(0, total), &format!("pushing batch 1/{total}"));

        let mut report = PushReport::default();
        for (index, batch) in batches.iter().enumerate() {
            self.update_session(|s| s.current_batch = index);

            let summary = self.inner.driver.push(batch).await?;
            for error in &summary.errors {
                warn!(index = error.index, error = %error.message, "Server rejected item");
            }
            for conflict in &summary.conflicts {
                warn!(
                    index = conflict.index,
                    reason = %conflict.reason,
                    server_item = ?conflict.server_item,
                    "Server reported conflict"
                );
            }
            if summary.conflict_count > summary.conflicts.len() as u64 {
                warn!(count = summary.conflict_count, "Server reported conflicts without details");
            }

            let rejected = summary.rejected_indices(batch.len());
            let confirmed: Vec<RecordVersion> = batch
                .iter()
                .enumerate()
                .filter(|(i, _)| !rejected.contains(i))
                .map(|(_, record)| record.version)
                .collect();

            if !confirmed.is_empty() {
                let applied = self.inner.driver.confirm_synced(&confirmed).await?;
                if applied < confirmed.len() as u64 {
                    debug!(
                        superseded = confirmed.len() as u64 - applied,
                        "Records edited during push stay pending"
                    );
                }
                self.emit(SyncEvent::LocalChangesUploaded {
                    entity: self.entity(),
                    uuids: confirmed.iter().map(|v| v.uuid.to_string()).collect(),
                });
            }

            report.batches += 1;
            report.uploaded += confirmed.len();
            report.rejected += rejected.len();
            debug!(
                batch = index + 1,
                total,
                created = summary.created,
                updated = summary.updated,
                confirmed = confirmed.len(),
                rejected = rejected.len(),
                "Batch pushed"
            );

            let done = index + 1;
            if done < total {
                self.progress(
                    batch_progress(done, total),
                    &format!("pushing batch {}/{}", done + 1, total),
                );
            }
        }

        self.update_session(SyncSession::clear_batches);
        Ok(report)
    }

    /// Emits the terminal event for a call and returns its outcome.
    async fn complete(&self, result: Result<String>) -> SyncOutcome {
        let entity = self.entity();
        let (result, message) = match result {
            Ok(message) => {
                self.record_sync_time().await;
                self.progress(100, "sync complete");
                info!(%message, "Sync succeeded");
                (SyncResult::Success, message)
            }
            Err(e) if e.is_auth_rejection() => {
                // Silent refresh; retrying the cycle is left to the caller.
                let renewed = self.inner.credentials.handle_auth_failure().await;
                let message = if renewed {
                    "authentication expired; credentials renewed, retry sync".to_string()
                } else {
                    "authentication failed; login required".to_string()
                };
                warn!(error = %e, renewed, "Sync rejected by server");
                (SyncResult::AuthError, message)
            }
            Err(e) => {
                let code = e.result();
                match e {
                    SyncError::AlreadySyncing(_) | SyncError::Cancelled => {
                        info!(reason = %e, "Sync ended without running")
                    }
                    _ => warn!(error = %e, result = ?code, "Sync failed"),
                }
                (code, e.to_string())
            }
        };

        self.emit(SyncEvent::Completed {
            entity,
            result,
            message: message.clone(),
        });
        SyncOutcome {
            entity,
            result,
            message,
        }
    }

    fn progress(&self, percent: u8, phase: &str) {
        self.emit(SyncEvent::Progress {
            entity: self.entity(),
            percent,
            phase: phase.to_string(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.inner.event_bus.emit(CoreEvent::Sync(event));
    }

    // =========================================================================
    // Auto-sync
    // =========================================================================

    /// Starts (or restarts) the recurring bidirectional sync.
    ///
    /// Returns `false` when the configured interval is zero.
    pub fn start_auto_sync(&self) -> bool {
        let interval = self.inner.settings.auto_sync_interval;
        if interval.is_zero() {
            debug!(entity = %self.entity(), "Auto-sync disabled");
            return false;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let orchestrator = SyncOrchestrator { inner };
                debug!(entity = %orchestrator.entity(), "Auto-sync tick");
                orchestrator
                    .sync_with_server(SyncDirection::Bidirectional)
                    .await;
            }
        });

        let previous = self.lock_auto_sync().replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(entity = %self.entity(), interval_secs = interval.as_secs(), "Auto-sync started");
        true
    }

    pub fn stop_auto_sync(&self) {
        if let Some(task) = self.lock_auto_sync().take() {
            task.abort();
            info!(entity = %self.entity(), "Auto-sync stopped");
        }
    }

    pub fn is_auto_sync_running(&self) -> bool {
        self.lock_auto_sync()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn lock_auto_sync(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .auto_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn push_message(report: &PushReport) -> String {
    if report.batches == 0 {
        return "nothing to push".to_string();
    }
    if report.rejected == 0 {
        format!(
            "uploaded {} records in {} batch(es)",
            report.uploaded, report.batches
        )
    } else {
        format!(
            "uploaded {} records, {} kept pending after server errors",
            report.uploaded, report.rejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_message() {
        assert_eq!(push_message(&PushReport::default()), "nothing to push");
        assert_eq!(
            push_message(&PushReport {
                batches: 2,
                uploaded: 150,
                rejected: 0
            }),
            "uploaded 150 records in 2 batch(es)"
        );
        assert!(push_message(&PushReport {
            batches: 1,
            uploaded: 8,
            rejected: 2
        })
        .contains("2 kept pending"));
    }

    #[test]
    fn test_settings_from_config() {
        let config = CoreConfig::builder()
            .max_batch_size(50)
            .push_first_when_pending(false)
            .auto_sync_interval(Duration::ZERO)
            .build()
            .unwrap();
        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.max_batch_size, 50);
        assert!(!settings.push_first_when_pending);
        assert!(settings.auto_sync_interval.is_zero());
    }
}
