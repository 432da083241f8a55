//! Identity and ordering policy for shard items.
//!
//! Two items are duplicates iff their [`identity`] strings are equal.
//! Ordering is newest-first by item date; ties are broken by a priority
//! flag (freshly ingested beats previously stored) and then by insertion
//! order, so every sort is fully deterministic.

use std::cmp::{Ordering, Reverse};

use chrono::NaiveDate;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::dates::item_date;

/// Priority of items that were already stored in a shard.
pub const PRIORITY_STORED: u8 = 0;
/// Priority of items introduced by the current run.
pub const PRIORITY_NEW: u8 = 1;

const URL_FIELDS: &[&str] = &["canonical", "url", "source"];

/// Compute the dedup key of an item.
///
/// Preference: `id` > `slug` > `canonical`/`url`/`source` > `title`, with a
/// structural hash of the item as the last resort for sparse payloads.
pub fn identity(item: &Value) -> String {
    if let Some(obj) = item.as_object() {
        if let Some(id) = obj.get("id").and_then(scalar_text) {
            return format!("id::{}", id.to_lowercase());
        }
        if let Some(slug) = obj.get("slug").and_then(non_empty_str) {
            return format!("slug::{}", slug.to_lowercase());
        }
        if let Some(url) = URL_FIELDS
            .iter()
            .find_map(|field| obj.get(*field).and_then(non_empty_str))
        {
            return url.to_string();
        }
        if let Some(title) = obj.get("title").and_then(non_empty_str) {
            return format!("title::{}", title);
        }
    }
    structural_hash(item)
}

/// Date component of the sort key; undated items sort as the oldest value.
pub fn date_key(item: &Value) -> NaiveDate {
    item_date(item).unwrap_or(NaiveDate::MIN)
}

/// Full ordering key. Larger keys sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub date: NaiveDate,
    pub priority: u8,
    pub order: Reverse<usize>,
}

/// An item decorated with everything needed to dedup and order it.
#[derive(Debug, Clone)]
pub struct Ranked {
    pub item: Value,
    pub identity: String,
    pub date: Option<NaiveDate>,
    pub priority: u8,
    pub order: usize,
}

impl Ranked {
    pub fn new(item: Value, priority: u8, order: usize) -> Self {
        let identity = identity(&item);
        let date = item_date(&item);
        Self {
            item,
            identity,
            date,
            priority,
            order,
        }
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey {
            date: self.date.unwrap_or(NaiveDate::MIN),
            priority: self.priority,
            order: Reverse(self.order),
        }
    }
}

/// Sort records newest-first.
pub fn sort_ranked(records: &mut [Ranked]) {
    records.sort_by(|a, b| compare_desc(a, b));
}

fn compare_desc(a: &Ranked, b: &Ranked) -> Ordering {
    b.sort_key().cmp(&a.sort_key())
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty_str(value).map(|_| s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn structural_hash(item: &Value) -> String {
    let canonical = canonicalize(item);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("hash::{:x}", hasher.finalize())
}

/// Rebuild `value` with object keys sorted, so key order never affects
/// the structural hash.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&obj[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_prefers_id() {
        let item = json!({"id": " ABC ", "slug": "story"});
        assert_eq!(identity(&item), "id::abc");
        assert_eq!(identity(&json!({"id": 42})), "id::42");
    }

    #[test]
    fn test_identity_blank_id_falls_through_to_slug() {
        let item = json!({"id": "  ", "slug": "My-Story"});
        assert_eq!(identity(&item), "slug::my-story");
    }

    #[test]
    fn test_identity_url_fields_in_order() {
        let item = json!({"url": "https://b", "source": "https://c"});
        assert_eq!(identity(&item), "https://b");
        let item = json!({"canonical": " https://a ", "url": "https://b"});
        assert_eq!(identity(&item), "https://a");
    }

    #[test]
    fn test_identity_title() {
        assert_eq!(identity(&json!({"title": "Hello"})), "title::Hello");
    }

    #[test]
    fn test_identity_hash_ignores_key_order() {
        let a = json!({"x": 1, "y": [1, 2]});
        let b = json!({"y": [1, 2], "x": 1});
        assert_eq!(identity(&a), identity(&b));
        assert!(identity(&a).starts_with("hash::"));
        assert_ne!(identity(&a), identity(&json!({"x": 2, "y": [1, 2]})));
    }

    #[test]
    fn test_identity_non_object() {
        assert!(identity(&json!("just a string")).starts_with("hash::"));
    }

    #[test]
    fn test_sort_newest_first_with_undated_last() {
        let mut records = vec![
            Ranked::new(json!({"slug": "none"}), PRIORITY_STORED, 0),
            Ranked::new(json!({"slug": "old", "date": "2024-05-01"}), PRIORITY_STORED, 1),
            Ranked::new(json!({"slug": "new", "date": "2024-05-08"}), PRIORITY_STORED, 2),
        ];
        sort_ranked(&mut records);
        let order: Vec<&str> = records.iter().map(|r| r.item["slug"].as_str().unwrap()).collect();
        assert_eq!(order, vec!["new", "old", "none"]);
    }

    #[test]
    fn test_ties_prefer_priority_then_insertion_order() {
        let mut records = vec![
            Ranked::new(json!({"slug": "a", "date": "2024-05-01"}), PRIORITY_STORED, 0),
            Ranked::new(json!({"slug": "b", "date": "2024-05-01"}), PRIORITY_STORED, 1),
            Ranked::new(json!({"slug": "c", "date": "2024-05-01"}), PRIORITY_NEW, 2),
        ];
        sort_ranked(&mut records);
        let order: Vec<&str> = records.iter().map(|r| r.item["slug"].as_str().unwrap()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_date_key_for_undated_is_min() {
        assert_eq!(date_key(&json!({"slug": "x"})), NaiveDate::MIN);
    }
}
