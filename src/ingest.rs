//! Hot shard ingestion.
//!
//! Coordinates the write path for freshly pulled posts: raw records →
//! normalization → routing → merge into the target hot shards. Records
//! that cannot be normalized are counted and dropped; a shard is only
//! rewritten when its serialized content changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde_json::Value;

use feedshard_core::merge::merge;
use feedshard_core::models::PostRecord;
use feedshard_core::router::Router;

use crate::shard::{extract, read_shard, ShardOrigin, ShardStore};

/// Inputs of an ingest run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub hot_dir: PathBuf,
    /// Date assigned to records without a usable date.
    pub current_date: NaiveDate,
    /// Feed-level category (`parent[/child]`) applied to every record.
    pub category: Option<String>,
    /// Hot shard capacity; `0` disables the cap.
    pub max_items: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Raw records in the batch.
    pub records: usize,
    /// Records dropped by the normalizer.
    pub rejected: usize,
    /// Hot shards the batch was routed to.
    pub shards: usize,
    /// Items whose identity was new to their shard.
    pub added: usize,
    /// Shards rewritten on disk.
    pub written: usize,
    /// Shards left untouched because their file could not be decoded.
    pub skipped: usize,
}

/// Read a batch file: a bare array of records or an object holding them
/// under `items`, `entries`, `posts` or `data`.
pub fn load_batch(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
    let payload: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse batch file: {}", path.display()))?;
    match extract(payload, ShardOrigin::Primary) {
        Some(shard) => Ok(shard.items),
        None => bail!(
            "Batch file {} must hold a JSON array or an object with an items list",
            path.display()
        ),
    }
}

/// Normalize, route and merge `records` into the hot tree.
pub fn ingest(
    records: Vec<Value>,
    opts: &IngestOptions,
    router: &Router,
    store: &ShardStore,
) -> Result<IngestReport> {
    let mut report = IngestReport {
        records: records.len(),
        ..IngestReport::default()
    };

    let mut batches: BTreeMap<PathBuf, Vec<Value>> = BTreeMap::new();
    for raw in &records {
        let Some(mut post) = PostRecord::normalize(raw, opts.current_date) else {
            report.rejected += 1;
            tracing::debug!(record = %raw, "dropping record without a usable slug");
            continue;
        };
        if let Some(category) = &opts.category {
            post.category_slug = Some(category.clone());
        }
        let entry = post.to_value();
        for coord in router.route(&post) {
            let path = coord.shard_path(&opts.hot_dir, router.default_child());
            batches.entry(path).or_default().push(entry.clone());
        }
    }

    report.shards = batches.len();
    for (path, new_items) in batches {
        let shard = read_shard(&path);
        if shard.origin == ShardOrigin::Unreadable {
            report.skipped += 1;
            tracing::warn!(
                shard = %path.display(),
                items = new_items.len(),
                "skipping unreadable hot shard; batch items for it were not stored"
            );
            continue;
        }
        let outcome = merge(shard.items, new_items, opts.max_items);
        report.added += outcome.added;
        if store.write_shard(&path, &outcome.items, &shard.template)? {
            report.written += 1;
        }
        tracing::debug!(
            shard = %path.display(),
            items = outcome.items.len(),
            added = outcome.added,
            "merged batch into hot shard"
        );
    }

    tracing::info!(?report, "ingest finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn options(hot_dir: &Path) -> IngestOptions {
        IngestOptions {
            hot_dir: hot_dir.to_path_buf(),
            current_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            category: None,
            max_items: 240,
        }
    }

    fn read_items(path: &Path) -> Vec<Value> {
        let text = std::fs::read_to_string(path).unwrap();
        let payload: Value = serde_json::from_str(&text).unwrap();
        payload["items"].as_array().unwrap().clone()
    }

    #[test]
    fn test_ingest_routes_and_counts() {
        let tmp = TempDir::new().unwrap();
        let hot = tmp.path().join("hot");
        let router = Router::new("general", "index", None).unwrap();
        let store = ShardStore::new(12, false);
        let records = vec![
            json!({"slug": "a", "category_slug": "tech/ai", "date": "2024-05-09"}),
            json!({"slug": "b", "category": "Tech", "date": "2024-05-08"}),
            json!({"slug": "c"}),
            json!({"title": "no slug"}),
        ];

        let report = ingest(records, &options(&hot), &router, &store).unwrap();
        assert_eq!(report.records, 4);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.shards, 3);
        assert_eq!(report.added, 3);
        assert_eq!(report.written, 3);

        assert_eq!(read_items(&hot.join("tech/ai/index.json")).len(), 1);
        assert_eq!(read_items(&hot.join("tech/index.json"))[0]["slug"], "b");
        let general = read_items(&hot.join("general/index.json"));
        assert_eq!(general[0]["date"], "2024-05-10");
    }

    #[test]
    fn test_reingest_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let hot = tmp.path().join("hot");
        let router = Router::new("general", "index", None).unwrap();
        let store = ShardStore::new(12, false);
        let records = vec![
            json!({"slug": "a", "category": "news", "date": "2024-05-01"}),
            json!({"slug": "b", "category": "news", "date": "2024-05-01"}),
        ];
        ingest(records.clone(), &options(&hot), &router, &store).unwrap();
        let before = std::fs::read(hot.join("news/index.json")).unwrap();

        let report = ingest(records, &options(&hot), &router, &store).unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.written, 0);
        assert_eq!(std::fs::read(hot.join("news/index.json")).unwrap(), before);
    }

    #[test]
    fn test_rollup_and_capacity() {
        let tmp = TempDir::new().unwrap();
        let hot = tmp.path().join("hot");
        let router = Router::new("general", "index", Some("index")).unwrap();
        let store = ShardStore::new(12, false);
        let mut opts = options(&hot);
        opts.max_items = 2;
        opts.category = Some("sports".to_string());
        let records = vec![
            json!({"slug": "s1", "date": "2024-05-01"}),
            json!({"slug": "s2", "date": "2024-05-03"}),
            json!({"slug": "s3", "date": "2024-05-02"}),
        ];
        ingest(records, &opts, &router, &store).unwrap();

        let sports = read_items(&hot.join("sports/index.json"));
        let slugs: Vec<&str> = sports.iter().map(|i| i["slug"].as_str().unwrap()).collect();
        assert_eq!(slugs, vec!["s2", "s3"]);
        assert_eq!(read_items(&hot.join("index/index.json")).len(), 2);
    }

    #[test]
    fn test_unreadable_shard_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let hot = tmp.path().join("hot");
        let router = Router::new("general", "index", None).unwrap();
        let store = ShardStore::new(12, false);
        let broken = hot.join("news/index.json");
        std::fs::create_dir_all(broken.parent().unwrap()).unwrap();
        let garbage = r#"{"items": [{"slug": "keep-me", "date": "2024-05-01"}"#;
        std::fs::write(&broken, garbage).unwrap();

        let records = vec![
            json!({"slug": "x", "category": "news"}),
            json!({"slug": "y", "category": "tech"}),
        ];
        let report = ingest(records, &options(&hot), &router, &store).unwrap();
        assert_eq!(report.shards, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.written, 1);
        assert_eq!(report.added, 1);
        assert_eq!(std::fs::read_to_string(&broken).unwrap(), garbage);
        assert_eq!(read_items(&hot.join("tech/index.json"))[0]["slug"], "y");
    }

    #[test]
    fn test_load_batch_shapes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("batch.json");
        std::fs::write(&path, r#"{"entries": [{"slug": "x"}]}"#).unwrap();
        assert_eq!(load_batch(&path).unwrap().len(), 1);
        std::fs::write(&path, r#"[{"slug": "x"}, {"slug": "y"}]"#).unwrap();
        assert_eq!(load_batch(&path).unwrap().len(), 2);
        std::fs::write(&path, "7").unwrap();
        assert!(load_batch(&path).is_err());
        std::fs::write(&path, "{oops").unwrap();
        assert!(load_batch(&path).is_err());
    }
}
