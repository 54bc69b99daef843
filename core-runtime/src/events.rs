//! # Event Bus System
//!
//! Typed observer channel for the sync core, built on `tokio::sync::broadcast`.
//! The credential manager and the sync orchestrators publish here; hosts and
//! the service layer subscribe.
//!
//! ## Overview
//!
//! - **Event Types**: [`AuthEvent`] and [`SyncEvent`], wrapped in [`CoreEvent`]
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Terminal events
//!
//! Every `sync_with_server` call ends with exactly one
//! [`SyncEvent::Completed`] carrying a [`SyncResult`] and a message. Hosts can
//! rely on that to drive progress indicators:
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut completions = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Sync(SyncEvent::Completed { .. })));
//! # let _ = &mut completions;
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber keeps receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. Treat as shutdown.
//!
//! Publishing with no subscribers returns an error that emitters ignore.

use bridge_traits::network::TransportErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// A 150 item push emits two progress events per batch, so 100 leaves room for
/// bursts. Subscribers that can't keep up receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Shared Sync Vocabulary
// ============================================================================

/// Record families that sync independently, each with its own session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Todo,
    Category,
}

impl EntityKind {
    /// Key of the record array in fetch responses and push bodies.
    pub fn key(&self) -> &'static str {
        match self {
            EntityKind::Todo => "todos",
            EntityKind::Category => "categories",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Which halves of a sync cycle run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncDirection {
    Bidirectional,
    UploadOnly,
    DownloadOnly,
}

impl SyncDirection {
    pub fn includes_fetch(&self) -> bool {
        !matches!(self, SyncDirection::UploadOnly)
    }

    pub fn includes_push(&self) -> bool {
        !matches!(self, SyncDirection::DownloadOnly)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncDirection::Bidirectional => "bidirectional",
            SyncDirection::UploadOnly => "upload_only",
            SyncDirection::DownloadOnly => "download_only",
        };
        f.write_str(name)
    }
}

/// Result code carried by the terminal sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncResult {
    Success,
    NetworkError,
    AuthError,
    ConflictError,
    UnknownError,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncResult::Success)
    }
}

impl From<TransportErrorKind> for SyncResult {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Timeout
            | TransportErrorKind::Connection
            | TransportErrorKind::Server => SyncResult::NetworkError,
            TransportErrorKind::Authentication => SyncResult::AuthError,
            TransportErrorKind::Parse | TransportErrorKind::Unknown => SyncResult::UnknownError,
        }
    }
}

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Credential lifecycle events
    Auth(AuthEvent),
    /// Sync session events
    Sync(SyncEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Completed { result, .. }) if !result.is_success() => {
                EventSeverity::Error
            }
            CoreEvent::Auth(AuthEvent::LoginRequired { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::LoginFailed { .. })
            | CoreEvent::Auth(AuthEvent::TokenRefreshFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. })
            | CoreEvent::Auth(AuthEvent::LoginSucceeded { .. })
            | CoreEvent::Auth(AuthEvent::FirstAuthCompleted { .. })
            | CoreEvent::Auth(AuthEvent::LoggedOut) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Credential lifecycle events raised by the credential manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// Login accepted by the server.
    LoginSucceeded { user_uuid: String, username: String },
    /// Login rejected locally (validation) or by the server.
    LoginFailed { message: String },
    /// First successful login or refresh in this process (or since the last
    /// logout).
    FirstAuthCompleted { user_uuid: String },
    /// A refresh request was issued.
    TokenRefreshStarted,
    /// Access token rotated.
    TokenRefreshed {
        /// Expiry of the new access token (Unix epoch seconds).
        expires_at: i64,
    },
    /// Refresh failed. `recoverable` is false when the refresh token itself
    /// was rejected.
    TokenRefreshFailed { message: String, recoverable: bool },
    /// Credentials were dropped; the user must log in again.
    LoginRequired { reason: String },
    /// Credentials were cleared on request.
    LoggedOut,
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::LoginSucceeded { .. } => "Login successful",
            AuthEvent::LoginFailed { .. } => "Login failed",
            AuthEvent::FirstAuthCompleted { .. } => "First authentication completed",
            AuthEvent::TokenRefreshStarted => "Refreshing access token",
            AuthEvent::TokenRefreshed { .. } => "Token refreshed successfully",
            AuthEvent::TokenRefreshFailed { .. } => "Token refresh failed",
            AuthEvent::LoginRequired { .. } => "Login required",
            AuthEvent::LoggedOut => "User logged out",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events raised by a sync orchestrator for one entity kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A session left `Idle`.
    Started {
        entity: EntityKind,
        direction: SyncDirection,
    },
    /// Overall progress, 0..=100.
    Progress {
        entity: EntityKind,
        percent: u8,
        phase: String,
    },
    /// Fetched records were reconciled into the local store.
    RemoteChangesApplied {
        entity: EntityKind,
        inserted: usize,
        updated: usize,
        skipped: usize,
    },
    /// Records confirmed by the server in one batch.
    LocalChangesUploaded {
        entity: EntityKind,
        uuids: Vec<String>,
    },
    /// Terminal event; exactly one per sync call.
    Completed {
        entity: EntityKind,
        result: SyncResult,
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync progress",
            SyncEvent::RemoteChangesApplied { .. } => "Remote changes applied",
            SyncEvent::LocalChangesUploaded { .. } => "Local changes uploaded",
            SyncEvent::Completed { .. } => "Sync completed",
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            SyncEvent::Started { entity, .. }
            | SyncEvent::Progress { entity, .. }
            | SyncEvent::RemoteChangesApplied { entity, .. }
            | SyncEvent::LocalChangesUploaded { entity, .. }
            | SyncEvent::Completed { entity, .. } => *entity,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for broadcasting events to multiple subscribers.
///
/// Cloning the bus is cheap; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
