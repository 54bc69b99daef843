//! Conflict resolution for imported and fetched records
//!
//! [`evaluate`] is a pure decision over an optional local record, an incoming
//! record and the active [`ConflictPolicy`]. The repositories apply the
//! decision; nothing here touches the database.

use crate::models::{SyncRecord, SyncState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Global rule for a UUID collision between a local and an incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConflictPolicy {
    /// Keep the local record.
    Skip,
    /// Replace the local record unconditionally.
    Overwrite,
    /// Last writer wins on `updated_at`; ties keep the local record.
    #[default]
    Merge,
    /// Always create a new record.
    Insert,
}

/// Where incoming records come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportSource {
    /// Fetched from the sync server; applied records are already synced.
    Server,
    /// A local backup or import file; applied records still need uploading.
    Local,
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictAction {
    Insert,
    Overwrite,
    Skip,
}

impl fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictAction::Insert => write!(f, "insert"),
            ConflictAction::Overwrite => write!(f, "overwrite"),
            ConflictAction::Skip => write!(f, "skip"),
        }
    }
}

/// Decides how an incoming record is applied.
///
/// ```
/// use chrono::Utc;
/// use core_library::conflict::{evaluate, ConflictAction, ConflictPolicy};
/// use core_library::models::{SyncRecord, SyncState};
/// use uuid::Uuid;
///
/// struct Rec(chrono::DateTime<Utc>);
/// impl SyncRecord for Rec {
///     fn uuid(&self) -> Uuid { Uuid::nil() }
///     fn updated_at(&self) -> chrono::DateTime<Utc> { self.0 }
///     fn sync_state(&self) -> SyncState { SyncState::Synced }
/// }
///
/// let now = Utc::now();
/// assert_eq!(evaluate(None::<&Rec>, &Rec(now), ConflictPolicy::Skip), ConflictAction::Insert);
/// assert_eq!(evaluate(Some(&Rec(now)), &Rec(now), ConflictPolicy::Merge), ConflictAction::Skip);
/// ```
pub fn evaluate<E, I>(existing: Option<&E>, incoming: &I, policy: ConflictPolicy) -> ConflictAction
where
    E: SyncRecord + ?Sized,
    I: SyncRecord + ?Sized,
{
    let Some(existing) = existing else {
        return ConflictAction::Insert;
    };

    match policy {
        ConflictPolicy::Skip => ConflictAction::Skip,
        ConflictPolicy::Overwrite => ConflictAction::Overwrite,
        ConflictPolicy::Insert => ConflictAction::Insert,
        ConflictPolicy::Merge => {
            if incoming.updated_at() > existing.updated_at() {
                ConflictAction::Overwrite
            } else {
                ConflictAction::Skip
            }
        }
    }
}

/// Sync flag for a record created from an import.
pub fn state_for_insert(source: ImportSource) -> SyncState {
    match source {
        ImportSource::Server => SyncState::Synced,
        ImportSource::Local => SyncState::PendingInsert,
    }
}

/// Sync flag for a local record overwritten by an import.
pub fn state_for_overwrite(source: ImportSource, previous: SyncState) -> SyncState {
    match source {
        ImportSource::Server => SyncState::Synced,
        ImportSource::Local => match previous {
            SyncState::PendingInsert => SyncState::PendingInsert,
            _ => SyncState::PendingUpdate,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    struct Rec {
        uuid: Uuid,
        updated_at: DateTime<Utc>,
        synced: SyncState,
    }

    impl SyncRecord for Rec {
        fn uuid(&self) -> Uuid {
            self.uuid
        }

        fn updated_at(&self) -> DateTime<Utc> {
            self.updated_at
        }

        fn sync_state(&self) -> SyncState {
            self.synced
        }
    }

    fn rec(updated_at: DateTime<Utc>) -> Rec {
        Rec {
            uuid: Uuid::nil(),
            updated_at,
            synced: SyncState::Synced,
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_record_always_inserts() {
        let incoming = rec(base_time());
        for policy in [
            ConflictPolicy::Skip,
            ConflictPolicy::Overwrite,
            ConflictPolicy::Merge,
            ConflictPolicy::Insert,
        ] {
            assert_eq!(
                evaluate::<Rec, Rec>(None, &incoming, policy),
                ConflictAction::Insert
            );
        }
    }

    #[test]
    fn test_policy_decisions_with_existing_record() {
        let existing = rec(base_time());
        let newer = rec(base_time() + Duration::seconds(1));
        let older = rec(base_time() - Duration::seconds(1));

        assert_eq!(
            evaluate(Some(&existing), &newer, ConflictPolicy::Skip),
            ConflictAction::Skip
        );
        assert_eq!(
            evaluate(Some(&existing), &older, ConflictPolicy::Overwrite),
            ConflictAction::Overwrite
        );
        assert_eq!(
            evaluate(Some(&existing), &older, ConflictPolicy::Insert),
            ConflictAction::Insert
        );
        assert_eq!(
            evaluate(Some(&existing), &newer, ConflictPolicy::Merge),
            ConflictAction::Overwrite
        );
        assert_eq!(
            evaluate(Some(&existing), &older, ConflictPolicy::Merge),
            ConflictAction::Skip
        );
    }

    #[test]
    fn test_merge_tie_keeps_local_record() {
        let existing = rec(base_time());
        let incoming = rec(base_time());
        assert_eq!(
            evaluate(Some(&existing), &incoming, ConflictPolicy::Merge),
            ConflictAction::Skip
        );
    }

    #[test]
    fn test_evaluate_is_repeatable_and_leaves_inputs_alone() {
        let existing = Rec {
            uuid: Uuid::new_v4(),
            updated_at: base_time(),
            synced: SyncState::PendingUpdate,
        };
        let incoming = rec(base_time() + Duration::minutes(5));

        let first = evaluate(Some(&existing), &incoming, ConflictPolicy::Merge);
        let second = evaluate(Some(&existing), &incoming, ConflictPolicy::Merge);

        assert_eq!(first, second);
        assert_eq!(existing.synced, SyncState::PendingUpdate);
        assert_eq!(existing.updated_at, base_time());
    }

    #[test]
    fn test_applied_sync_states() {
        assert_eq!(state_for_insert(ImportSource::Server), SyncState::Synced);
        assert_eq!(
            state_for_insert(ImportSource::Local),
            SyncState::PendingInsert
        );

        assert_eq!(
            state_for_overwrite(ImportSource::Server, SyncState::PendingUpdate),
            SyncState::Synced
        );
        assert_eq!(
            state_for_overwrite(ImportSource::Local, SyncState::PendingInsert),
            SyncState::PendingInsert
        );
        assert_eq!(
            state_for_overwrite(ImportSource::Local, SyncState::Synced),
            SyncState::PendingUpdate
        );
    }
}
