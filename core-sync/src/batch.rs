//! # Batch Pusher Support
//!
//! Splitting the pending set into server-sized batches and interpreting the
//! server's per-batch summary.
//!
//! ## Push response
//!
//! ```text
//! { "summary": { "created": 3, "updated": 1,
//!                "errors":    [ {"index": 2, "error": "title too long"} ],
//!                "conflicts": [ {"index": 5, "reason": "stale", "server_item": {...}} ] } }
//! ```
//!
//! Older servers report `conflicts` as a bare count with the details in
//! `conflict_details`; both shapes are accepted.

use crate::error::{Result, SyncError};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

/// Splits `items` into consecutive batches of at most `max_batch_size`,
/// preserving order.
///
/// ```
/// use core_sync::batch::partition;
///
/// let batches = partition((0..250).collect::<Vec<_>>(), 100);
/// assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![100, 100, 50]);
/// ```
pub fn partition<T>(items: Vec<T>, max_batch_size: usize) -> Vec<Vec<T>> {
    let size = max_batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

/// Overall progress after `completed` of `total` batches.
pub fn batch_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 95;
    }
    let completed = completed.min(total);
    (75 + 20 * completed / total) as u8
}

/// A per-item failure reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub index: usize,
    pub message: String,
}

/// A per-item conflict reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemConflict {
    pub index: usize,
    pub reason: String,
    pub server_item: Option<Value>,
}

/// Parsed `summary` of a push response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushSummary {
    pub created: u64,
    pub updated: u64,
    pub errors: Vec<ItemError>,
    pub conflicts: Vec<ItemConflict>,
    /// Conflict count from servers that only report a number.
    pub conflict_count: u64,
}

impl PushSummary {
    /// Parses a push response body.
    ///
    /// A response without a `summary` object, including an empty body,
    /// means the whole batch was accepted.
    pub fn parse(response: &Value) -> Result<Self> {
        if response.is_null() {
            return Ok(Self::default());
        }
        let obj = response
            .as_object()
            .ok_or_else(|| SyncError::InvalidResponse("push response is not an object".into()))?;

        let Some(summary) = obj.get("summary").and_then(Value::as_object) else {
            return Ok(Self::default());
        };

        let count = |key: &str| summary.get(key).and_then(Value::as_u64).unwrap_or(0);

        let errors = summary
            .get("errors")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let index = index_of(item)?;
                        let message = item
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        Some(ItemError { index, message })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let (conflicts, conflict_count) = match summary.get("conflicts") {
            Some(Value::Array(items)) => {
                let conflicts: Vec<ItemConflict> = items.iter().filter_map(parse_conflict).collect();
                let n = conflicts.len() as u64;
                (conflicts, n)
            }
            Some(Value::Number(n)) => {
                let details = summary
                    .get("conflict_details")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(parse_conflict).collect())
                    .unwrap_or_default();
                (details, n.as_u64().unwrap_or(0))
            }
            _ => (Vec::new(), 0),
        };

        Ok(Self {
            created: count("created"),
            updated: count("updated"),
            errors,
            conflicts,
            conflict_count,
        })
    }

    /// Batch positions the server did not accept, limited to the batch.
    pub fn rejected_indices(&self, batch_len: usize) -> BTreeSet<usize> {
        let mut rejected = BTreeSet::new();
        let indices = self
            .errors
            .iter()
            .map(|e| e.index)
            .chain(self.conflicts.iter().map(|c| c.index));
        for index in indices {
            if index < batch_len {
                rejected.insert(index);
            } else {
                warn!(index, batch_len, "Server referenced an index outside the batch");
            }
        }
        rejected
    }

    pub fn has_problems(&self) -> bool {
        !self.errors.is_empty() || !self.conflicts.is_empty() || self.conflict_count > 0
    }
}

fn index_of(item: &Value) -> Option<usize> {
    item.get("index")
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
}

fn parse_conflict(item: &Value) -> Option<ItemConflict> {
    Some(ItemConflict {
        index: index_of(item)?,
        reason: item
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        server_item: item.get("server_item").filter(|v| !v.is_null()).cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partition_counts_and_order() {
        for n in [0usize, 1, 99, 100, 101, 150, 200, 201, 1000] {
            let items: Vec<usize> = (0..n).collect();
            let batches = partition(items.clone(), 100);

            assert_eq!(batches.len(), n.div_ceil(100), "n = {n}");
            assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), n);
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 100));
            let flattened: Vec<usize> = batches.into_iter().flatten().collect();
            assert_eq!(flattened, items);
        }
    }

    #[test]
    fn test_batch_progress() {
        assert_eq!(batch_progress(0, 2), 75);
        assert_eq!(batch_progress(1, 2), 85);
        assert_eq!(batch_progress(2, 2), 95);
        assert_eq!(batch_progress(1, 3), 81);
    }

    #[test]
    fn test_parse_summary_with_errors_and_conflicts() {
        let response = json!({
            "summary": {
                "created": 7,
                "updated": 1,
                "errors": [ {"index": 2, "error": "bad title"} ],
                "conflicts": [ {"index": 5, "reason": "stale", "server_item": {"uuid": "x"}} ]
            }
        });

        let summary = PushSummary::parse(&response).unwrap();
        assert_eq!(summary.created, 7);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.errors[0].message, "bad title");
        assert_eq!(summary.conflicts[0].reason, "stale");
        assert!(summary.conflicts[0].server_item.is_some());
        assert_eq!(
            summary.rejected_indices(10).into_iter().collect::<Vec<_>>(),
            vec![2, 5]
        );
    }

    #[test]
    fn test_parse_legacy_conflict_count() {
        let response = json!({ "summary": { "created": 1, "conflicts": 2 } });
        let summary = PushSummary::parse(&response).unwrap();

        assert_eq!(summary.conflict_count, 2);
        assert!(summary.conflicts.is_empty());
        assert!(summary.has_problems());
        assert!(summary.rejected_indices(5).is_empty());
    }

    #[test]
    fn test_parse_conflict_details() {
        let response = json!({
            "summary": { "conflicts": 1, "conflict_details": [ {"index": 0, "reason": "newer"} ] }
        });
        let summary = PushSummary::parse(&response).unwrap();
        assert_eq!(summary.rejected_indices(1).len(), 1);
    }

    #[test]
    fn test_missing_summary_accepts_batch() {
        let summary = PushSummary::parse(&json!({"ok": true})).unwrap();
        assert!(!summary.has_problems());
        assert!(PushSummary::parse(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_empty_body_accepts_batch() {
        // A 204 reaches the parser as `null`.
        let summary = PushSummary::parse(&Value::Null).unwrap();
        assert_eq!(summary, PushSummary::default());
        assert!(summary.rejected_indices(3).is_empty());
    }

    #[test]
    fn test_out_of_range_indices_are_ignored() {
        let response = json!({ "summary": { "errors": [ {"index": 12, "error": "?"}, {"error": "no index"} ] } });
        let summary = PushSummary::parse(&response).unwrap();
        assert!(summary.rejected_indices(10).is_empty());
    }
}
