//! Listing entities shared by the selector, the engine and the reporter

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One eligible listing as produced by the candidate selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Owning account; every partition is processed by its own worker
    pub partition_key: String,
    pub item_id: String,
}

impl CandidateItem {
    pub fn new(partition_key: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            item_id: item_id.into(),
        }
    }
}

/// Per-item answer of the remote batch call, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItemResult {
    pub item_id: String,
    pub success: bool,
    pub error_code: Option<String>,
}

impl RemoteItemResult {
    pub fn ok(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            success: true,
            error_code: None,
        }
    }

    pub fn failed(item_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            success: false,
            error_code: Some(code.into()),
        }
    }
}

/// 배치 응답 분류 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Success,
    Failure,
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub item_id: String,
    pub classification: Classification,
    pub error_code: Option<String>,
}

/// Final state of one partition worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub partition_key: String,
    /// Listings the remote side confirmed as ended and that were reconciled locally
    pub deleted_count: u64,
    /// Rows the local store actually removed (may be lower under concurrent mutation)
    pub rows_affected: u64,
    pub was_rate_limited: bool,
    pub was_cancelled: bool,
}

impl PartitionResult {
    pub fn empty(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            ..Self::default()
        }
    }
}

/// Groups candidates by partition.
///
/// Partitions keep the order in which they were first seen and items keep
/// their selection order. Duplicate pairs are dropped.
pub fn group_by_partition(candidates: Vec<CandidateItem>) -> Vec<(String, Vec<String>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();

    for CandidateItem { partition_key, item_id } in candidates {
        if !seen.insert((partition_key.clone(), item_id.clone())) {
            continue;
        }
        let slot = *index.entry(partition_key.clone()).or_insert_with(|| {
            groups.push((partition_key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(item_id);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_partition_keeps_selection_order() {
        let candidates = vec![
            CandidateItem::new("acc-b", "3"),
            CandidateItem::new("acc-a", "1"),
            CandidateItem::new("acc-b", "4"),
            CandidateItem::new("acc-a", "2"),
        ];

        let groups = group_by_partition(candidates);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], ("acc-b".to_string(), vec!["3".to_string(), "4".to_string()]));
        assert_eq!(groups[1], ("acc-a".to_string(), vec!["1".to_string(), "2".to_string()]));
    }

    #[test]
    fn test_group_by_partition_drops_duplicates() {
        let candidates = vec![
            CandidateItem::new("acc", "1"),
            CandidateItem::new("acc", "1"),
            CandidateItem::new("other", "1"),
        ];

        let groups = group_by_partition(candidates);

        assert_eq!(groups[0].1, vec!["1".to_string()]);
        assert_eq!(groups[1].1, vec!["1".to_string()]);
    }

    #[test]
    fn test_group_by_partition_empty() {
        assert!(group_by_partition(Vec::new()).is_empty());
    }
}
