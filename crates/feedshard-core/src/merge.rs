//! Merge engine shared by hot ingest and archive rotation.
//!
//! Both paths reduce to the same operation: fold a batch of incoming items
//! into the items already stored in a shard, drop duplicates, restore
//! newest-first order and optionally cap the result.
//!
//! # Algorithm
//!
//! 1. Rank new items first (priority 1), then stored items (priority 0).
//! 2. Keep the first occurrence of every identity. A new item that repeats a
//!    stored identity replaces the stored content but inherits the stored
//!    item's rank, so re-ingesting unchanged data never reshuffles a shard.
//! 3. Stable sort by [`SortKey`](crate::identity::SortKey), descending.
//! 4. Truncate to `max_items` when it is non-zero. Capacity is applied only
//!    after ordering, so the newest items always win.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::identity::{sort_ranked, Ranked, PRIORITY_NEW, PRIORITY_STORED};

/// Result of a [`merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Deduplicated, ordered and capped items.
    pub items: Vec<Value>,
    /// Distinct incoming identities that were not stored before.
    pub added: usize,
}

/// Merge `new` into `existing`.
///
/// # Arguments
///
/// * `existing`: Items currently stored in the shard, in stored order.
/// * `new`: Incoming items, in arrival order.
/// * `max_items`: Capacity of the shard, `0` for unbounded.
pub fn merge(existing: Vec<Value>, new: Vec<Value>, max_items: usize) -> MergeOutcome {
    let new_len = new.len();
    let stored: Vec<Ranked> = existing
        .into_iter()
        .enumerate()
        .map(|(idx, item)| Ranked::new(item, PRIORITY_STORED, new_len + idx))
        .collect();

    let mut stored_rank: HashMap<&str, usize> = HashMap::with_capacity(stored.len());
    for record in &stored {
        stored_rank
            .entry(record.identity.as_str())
            .or_insert(record.order);
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(new_len + stored.len());
    let mut records: Vec<Ranked> = Vec::with_capacity(new_len + stored.len());
    let mut added = 0;

    for (idx, item) in new.into_iter().enumerate() {
        let mut record = Ranked::new(item, PRIORITY_NEW, idx);
        if seen.contains(&record.identity) {
            continue;
        }
        match stored_rank.get(record.identity.as_str()) {
            Some(&order) => {
                record.priority = PRIORITY_STORED;
                record.order = order;
            }
            None => added += 1,
        }
        seen.insert(record.identity.clone());
        records.push(record);
    }
    drop(stored_rank);

    for record in stored {
        if seen.insert(record.identity.clone()) {
            records.push(record);
        }
    }

    sort_ranked(&mut records);
    if max_items > 0 {
        records.truncate(max_items);
    }

    MergeOutcome {
        items: records.into_iter().map(|r| r.item).collect(),
        added,
    }
}

/// Dedup and reorder a stored item list on its own.
///
/// Used to self-heal shards written by older or foreign tools before they
/// are partitioned or rewritten.
pub fn normalize_items(items: Vec<Value>) -> Vec<Value> {
    merge(items, Vec::new(), 0).items
}
