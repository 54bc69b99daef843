//! Refresh scheduling.
//!
//! [`compute_refresh_delay`] turns an access-token expiry into the delay
//! before the next refresh, and [`RefreshTimer`] is a single-slot delayed
//! task: scheduling always cancels whatever was scheduled before.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::trace;

/// Upper bound for a single timer tick.
pub const MAX_REFRESH_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Delay before refreshing a token that expires at `expires_at`.
///
/// `(expires_at - now) - window`, clamped to zero and capped at
/// [`MAX_REFRESH_DELAY`]. An already expired token yields zero.
///
/// ```
/// use chrono::{Duration as ChronoDuration, Utc};
/// use core_auth::scheduler::compute_refresh_delay;
/// use std::time::Duration;
///
/// let now = Utc::now();
/// let window = Duration::from_secs(300);
/// assert_eq!(
///     compute_refresh_delay(now + ChronoDuration::seconds(3600), now, window),
///     Duration::from_secs(3300)
/// );
/// assert_eq!(
///     compute_refresh_delay(now + ChronoDuration::seconds(100), now, window),
///     Duration::ZERO
/// );
/// ```
pub fn compute_refresh_delay(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
) -> Duration {
    let remaining = expires_at - now;
    if remaining <= chrono::Duration::zero() {
        return Duration::ZERO;
    }
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
    (remaining - window)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .min(MAX_REFRESH_DELAY)
}

#[derive(Default)]
struct Slot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Single-slot delayed task.
///
/// The task runs on the ambient tokio runtime. Once a task starts running it
/// detaches itself from the slot, so it may call [`RefreshTimer::schedule`]
/// on the same timer without aborting itself.
#[derive(Default)]
pub struct RefreshTimer {
    slot: Arc<Mutex<Slot>>,
}

impl RefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay`, cancelling any previously scheduled task.
    pub fn schedule<F, Fut>(&self, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);

        trace!(delay_ms = delay.as_millis() as u64, generation, "Timer armed");
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = lock(&shared);
                if slot.generation != generation {
                    return;
                }
                slot.handle = None;
            }
            task().await;
        }));
    }

    /// Cancels the pending task, if any.
    pub fn cancel(&self) {
        let mut slot = lock(&self.slot);
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }

    /// Whether a task is waiting for its delay to elapse.
    pub fn is_scheduled(&self) -> bool {
        lock(&self.slot).handle.is_some()
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
