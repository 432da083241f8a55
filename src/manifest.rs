//! Manifest and summary generation.
//!
//! Manifests list every shard with its item count, date range and page
//! count; summaries roll the same numbers up into a parent → child
//! (→ month) tree for navigation. Both are always rebuilt from what is on
//! disk and never read back as a source of truth.
//!
//! `generated_at` is the latest item date seen, not the wall clock, so
//! regenerating an unchanged tree yields byte-identical files.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use feedshard_core::merge::normalize_items;
use feedshard_core::router::{display_slug, ArchiveCoord, HotCoord};

use crate::shard::{
    calc_pages, earliest_date, gz_path, latest_date, list_shards, read_shard, relative_parts,
    ShardStore,
};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotShardEntry {
    pub parent: String,
    pub child: String,
    pub slug: String,
    pub path: String,
    pub items: usize,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveShardEntry {
    pub parent: String,
    pub child: String,
    pub slug: String,
    pub year: i32,
    pub month: u32,
    pub path: String,
    pub path_gz: String,
    pub items: usize,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest<E> {
    pub generated_at: Option<String>,
    pub per_page: usize,
    pub total_items: usize,
    pub shards: Vec<E>,
}

pub type HotManifest = Manifest<HotShardEntry>;
pub type ArchiveManifest = Manifest<ArchiveShardEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthSummary {
    pub year: i32,
    pub month: u32,
    pub items: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSummary {
    pub child: String,
    pub slug: String,
    pub items: usize,
    pub pages: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<Vec<MonthSummary>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSummary {
    pub parent: String,
    pub items: usize,
    pub pages: usize,
    pub children: Vec<ChildSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub generated_at: Option<String>,
    pub per_page: usize,
    pub total_items: usize,
    pub parents: Vec<ParentSummary>,
}

/// Per-shard numbers shared by hot and archive entries.
struct ShardFacts {
    items: usize,
    first: Option<NaiveDate>,
    last: Option<NaiveDate>,
}

fn shard_facts(path: &Path) -> ShardFacts {
    let items = normalize_items(read_shard(path).items);
    ShardFacts {
        items: items.len(),
        first: earliest_date(&items),
        last: latest_date(&items),
    }
}

fn iso(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn join_parts(parts: &[String]) -> String {
    parts.join("/")
}

#[derive(Default)]
struct ChildAcc {
    items: usize,
    months: Vec<MonthSummary>,
}

type Tree = BTreeMap<String, BTreeMap<String, ChildAcc>>;

fn summarize(
    tree: Tree,
    generated_at: Option<String>,
    per_page: usize,
    total_items: usize,
    default_child: &str,
    with_months: bool,
) -> Summary {
    let parents = tree
        .into_iter()
        .map(|(parent, children)| {
            let items: usize = children.values().map(|c| c.items).sum();
            let children = children
                .into_iter()
                .map(|(child, mut acc)| {
                    acc.months
                        .sort_by(|a, b| (b.year, b.month).cmp(&(a.year, a.month)));
                    ChildSummary {
                        slug: display_slug(&parent, &child, default_child),
                        items: acc.items,
                        pages: calc_pages(acc.items, per_page),
                        months: with_months.then_some(acc.months),
                        child,
                    }
                })
                .collect();
            ParentSummary {
                pages: calc_pages(items, per_page),
                parent,
                items,
                children,
            }
        })
        .collect();

    Summary {
        generated_at,
        per_page,
        total_items,
        parents,
    }
}

/// Build the hot manifest and summary from the tree under `hot_dir`.
pub fn build_hot(hot_dir: &Path, per_page: usize, default_child: &str) -> Result<(HotManifest, Summary)> {
    let mut shards = Vec::new();
    let mut tree: Tree = BTreeMap::new();
    let mut total_items = 0;
    let mut latest: Option<NaiveDate> = None;

    for path in list_shards(hot_dir)? {
        let parts = relative_parts(hot_dir, &path);
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let Some(coord) = HotCoord::from_relative(&refs, default_child) else {
            continue;
        };
        let facts = shard_facts(&path);
        total_items += facts.items;
        latest = latest.max(facts.last);

        tree.entry(coord.parent.clone())
            .or_default()
            .entry(coord.child.clone())
            .or_default()
            .items += facts.items;

        shards.push(HotShardEntry {
            slug: coord.slug(default_child),
            parent: coord.parent,
            child: coord.child,
            path: join_parts(&parts),
            items: facts.items,
            first_date: iso(facts.first),
            last_date: iso(facts.last),
            pages: calc_pages(facts.items, per_page),
        });
    }

    shards.sort_by(|a, b| (&a.parent, &a.child).cmp(&(&b.parent, &b.child)));
    let generated_at = iso(latest);
    let summary = summarize(tree, generated_at.clone(), per_page, total_items, default_child, false);
    let manifest = Manifest {
        generated_at,
        per_page,
        total_items,
        shards,
    };
    Ok((manifest, summary))
}

/// Build the archive manifest and summary from the tree under
/// `archive_dir`. Paths that are not `<parent>/.../<yyyy>/<mm>/index.json`
/// are skipped with a warning.
pub fn build_archive(
    archive_dir: &Path,
    per_page: usize,
    default_child: &str,
) -> Result<(ArchiveManifest, Summary)> {
    let mut shards = Vec::new();
    let mut tree: Tree = BTreeMap::new();
    let mut total_items = 0;
    let mut latest: Option<NaiveDate> = None;

    for path in list_shards(archive_dir)? {
        let parts = relative_parts(archive_dir, &path);
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let Some(coord) = ArchiveCoord::from_relative(&refs, default_child) else {
            tracing::warn!(path = %path.display(), "skipping archive file outside <yyyy>/<mm> layout");
            continue;
        };
        let facts = shard_facts(&path);
        total_items += facts.items;
        latest = latest.max(facts.last);

        let acc = tree
            .entry(coord.parent.clone())
            .or_default()
            .entry(coord.child.clone())
            .or_default();
        acc.items += facts.items;
        acc.months.push(MonthSummary {
            year: coord.year,
            month: coord.month,
            items: facts.items,
            pages: calc_pages(facts.items, per_page),
        });

        let gz_parts = relative_parts(archive_dir, &gz_path(&path));
        shards.push(ArchiveShardEntry {
            slug: coord.slug(default_child),
            parent: coord.parent,
            child: coord.child,
            year: coord.year,
            month: coord.month,
            path: join_parts(&parts),
            path_gz: join_parts(&gz_parts),
            items: facts.items,
            first_date: iso(facts.first),
            last_date: iso(facts.last),
            pages: calc_pages(facts.items, per_page),
        });
    }

    shards.sort_by(|a, b| {
        (&a.parent, &a.child, a.year, a.month).cmp(&(&b.parent, &b.child, b.year, b.month))
    });
    let generated_at = iso(latest);
    let summary = summarize(tree, generated_at.clone(), per_page, total_items, default_child, true);
    let manifest = Manifest {
        generated_at,
        per_page,
        total_items,
        shards,
    };
    Ok((manifest, summary))
}

/// Which manifest files a [`write_manifests`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestWrites {
    pub hot_manifest: bool,
    pub hot_summary: bool,
    pub archive_manifest: bool,
    pub archive_summary: bool,
    pub hot_total: usize,
    pub archive_total: usize,
}

/// Rebuild and persist `manifest.json` and `summary.json` in both roots.
pub fn write_manifests(
    hot_dir: &Path,
    archive_dir: &Path,
    default_child: &str,
    store: &ShardStore,
) -> Result<ManifestWrites> {
    let per_page = store.per_page();
    let (hot_manifest, hot_summary) = build_hot(hot_dir, per_page, default_child)?;
    let (archive_manifest, archive_summary) = build_archive(archive_dir, per_page, default_child)?;

    let writes = ManifestWrites {
        hot_manifest: store.write_serialized(&hot_dir.join(MANIFEST_FILE), &hot_manifest)?,
        hot_summary: store.write_serialized(&hot_dir.join(SUMMARY_FILE), &hot_summary)?,
        archive_manifest: store
            .write_serialized(&archive_dir.join(MANIFEST_FILE), &archive_manifest)?,
        archive_summary: store.write_serialized(&archive_dir.join(SUMMARY_FILE), &archive_summary)?,
        hot_total: hot_manifest.total_items,
        archive_total: archive_manifest.total_items,
    };
    tracing::info!(?writes, "manifests regenerated");
    Ok(writes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::shard::ShardTemplate;

    fn write(store: &ShardStore, path: &Path, items: Vec<serde_json::Value>) {
        store
            .write_shard(path, &items, &ShardTemplate::default())
            .unwrap();
    }

    #[test]
    fn test_hot_manifest_and_summary() {
        let tmp = TempDir::new().unwrap();
        let hot = tmp.path().join("hot");
        let store = ShardStore::new(2, false);
        write(
            &store,
            &hot.join("tech/index.json"),
            vec![
                json!({"slug": "a", "date": "2024-05-09"}),
                json!({"slug": "b", "date": "2024-05-01"}),
                json!({"slug": "c", "date": "2024-04-30"}),
            ],
        );
        write(
            &store,
            &hot.join("tech/ai/index.json"),
            vec![json!({"slug": "d", "date": "2024-05-02"})],
        );

        let (manifest, summary) = build_hot(&hot, 2, "index").unwrap();
        assert_eq!(manifest.generated_at.as_deref(), Some("2024-05-09"));
        assert_eq!(manifest.total_items, 4);
        let slugs: Vec<&str> = manifest.shards.iter().map(|s| s.slug.as_str()).collect();
        assert_eq!(slugs, vec!["tech/ai", "tech"]);
        let tech = &manifest.shards[1];
        assert_eq!(tech.path, "tech/index.json");
        assert_eq!(tech.items, 3);
        assert_eq!(tech.pages, 2);
        assert_eq!(tech.first_date.as_deref(), Some("2024-04-30"));

        assert_eq!(summary.parents.len(), 1);
        assert_eq!(summary.parents[0].items, 4);
        assert_eq!(summary.parents[0].pages, 2);
        assert!(summary.parents[0].children.iter().all(|c| c.months.is_none()));
    }

    #[test]
    fn test_archive_months_sorted_descending() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("archive");
        let store = ShardStore::new(12, false);
        for (ym, slug) in [("2024/03", "m"), ("2023/12", "d"), ("2024/04", "a")] {
            let path = archive.join(format!("tech/index/{}/index.json", ym));
            let items = vec![json!({"slug": slug, "date": format!("{}-15", ym.replace('/', "-"))})];
            store
                .write_bucket(&path, &items, &ShardTemplate::default())
                .unwrap();
        }
        let stray = archive.join("tech/notes/index.json");
        write(&store, &stray, vec![json!({"slug": "x"})]);

        let (manifest, summary) = build_archive(&archive, 12, "index").unwrap();
        assert_eq!(manifest.total_items, 3);
        assert_eq!(manifest.shards[0].year, 2023);
        assert_eq!(manifest.shards[0].path_gz, "tech/index/2023/12/index.json.gz");
        let months = summary.parents[0].children[0].months.as_ref().unwrap();
        let order: Vec<(i32, u32)> = months.iter().map(|m| (m.year, m.month)).collect();
        assert_eq!(order, vec![(2024, 4), (2024, 3), (2023, 12)]);
        assert_eq!(summary.parents[0].children[0].slug, "tech");
    }

    #[test]
    fn test_write_manifests_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let hot = tmp.path().join("hot");
        let archive = tmp.path().join("archive");
        let store = ShardStore::new(12, false);
        write(&store, &hot.join("news/index.json"), vec![json!({"slug": "n"})]);

        let first = write_manifests(&hot, &archive, "index", &store).unwrap();
        assert!(first.hot_manifest && first.archive_summary);
        assert!(hot.join(MANIFEST_FILE).exists());
        let again = write_manifests(&hot, &archive, "index", &store).unwrap();
        assert!(!again.hot_manifest && !again.hot_summary);
        assert!(!again.archive_manifest && !again.archive_summary);

        let text = std::fs::read_to_string(hot.join(MANIFEST_FILE)).unwrap();
        let parsed: HotManifest = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.generated_at, None);
        assert_eq!(parsed.shards[0].slug, "news");
    }
}
