//! Consistency checks over the hot and archive trees.
//!
//! Validation is read-only. It checks every shard against the invariants
//! the writers maintain (counts, pagination, no duplicate identities,
//! newest-first order, matching gzip mirrors, kebab-case paths) and checks
//! the archive manifest, summary and on-disk buckets against each other.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Datelike;
use serde_json::Value;

use feedshard_core::dates::item_date;
use feedshard_core::identity::{date_key, identity};
use feedshard_core::router::{is_kebab_slug, ArchiveCoord, HotCoord};

use crate::manifest::{build_archive, build_hot, ArchiveManifest, Summary, MANIFEST_FILE, SUMMARY_FILE};
use crate::shard::{
    calc_pages, gz_path, latest_date, list_shards, read_gzip_text, read_shard, relative_parts,
    ShardOrigin, ShardTemplate,
};

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub hot_shards: usize,
    pub archive_buckets: usize,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, path: &Path, message: impl Into<String>) {
        self.issues.push(Issue {
            path: path.to_path_buf(),
            message: message.into(),
        });
    }
}

/// Validate both trees.
pub fn validate(
    hot_dir: &Path,
    archive_dir: &Path,
    per_page: usize,
    default_child: &str,
) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    for path in list_shards(hot_dir)? {
        let parts = relative_parts(hot_dir, &path);
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let Some(coord) = HotCoord::from_relative(&refs, default_child) else {
            report.push(&path, "shard has no parent directory");
            continue;
        };
        report.hot_shards += 1;
        check_slugs(&mut report, &path, &coord.parent, &coord.child);
        check_shard(&mut report, &path, per_page);
    }

    for path in list_shards(archive_dir)? {
        let parts = relative_parts(archive_dir, &path);
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let Some(coord) = ArchiveCoord::from_relative(&refs, default_child) else {
            report.push(&path, "archive file is not at <parent>/<child>/<yyyy>/<mm>/index.json");
            continue;
        };
        report.archive_buckets += 1;
        check_slugs(&mut report, &path, &coord.parent, &coord.child);
        check_shard(&mut report, &path, per_page);
        check_bucket(&mut report, &path, &coord);
    }

    let (hot_manifest, hot_summary) = build_hot(hot_dir, per_page, default_child)?;
    check_fresh(&mut report, &hot_dir.join(MANIFEST_FILE), &serde_json::to_value(&hot_manifest)?);
    check_fresh(&mut report, &hot_dir.join(SUMMARY_FILE), &serde_json::to_value(&hot_summary)?);

    let (archive_manifest, archive_summary) = build_archive(archive_dir, per_page, default_child)?;
    check_fresh(
        &mut report,
        &archive_dir.join(MANIFEST_FILE),
        &serde_json::to_value(&archive_manifest)?,
    );
    check_fresh(
        &mut report,
        &archive_dir.join(SUMMARY_FILE),
        &serde_json::to_value(&archive_summary)?,
    );
    check_archive_index(&mut report, archive_dir);

    tracing::info!(
        hot_shards = report.hot_shards,
        archive_buckets = report.archive_buckets,
        issues = report.issues.len(),
        "validation finished"
    );
    Ok(report)
}

fn check_slugs(report: &mut ValidationReport, path: &Path, parent: &str, child: &str) {
    if !is_kebab_slug(parent) {
        report.push(path, format!("parent '{}' is not kebab-case", parent));
    }
    if !is_kebab_slug(child) {
        report.push(path, format!("child '{}' is not kebab-case", child));
    }
}

fn check_shard(report: &mut ValidationReport, path: &Path, per_page: usize) {
    let shard = read_shard(path);
    match shard.origin {
        ShardOrigin::Primary => {}
        ShardOrigin::Mirror => report.push(path, "JSON is unreadable; only the gzip mirror decodes"),
        ShardOrigin::Unreadable | ShardOrigin::Missing => {
            report.push(path, "shard cannot be decoded");
            return;
        }
    }
    let items = &shard.items;
    let total = items.len();

    if let ShardTemplate::Wrapped { fields, .. } = &shard.template {
        if fields.get("count").and_then(Value::as_u64) != Some(total as u64) {
            report.push(path, format!("count does not match {} items", total));
        }
        let pagination = fields.get("pagination");
        let field = |name: &str| pagination.and_then(|p| p.get(name)).and_then(Value::as_u64);
        if field("total_items") != Some(total as u64) {
            report.push(path, format!("pagination.total_items does not match {} items", total));
        }
        if field("per_page") != Some(per_page as u64) {
            report.push(path, format!("pagination.per_page is not {}", per_page));
        }
        if field("total_pages") != Some(calc_pages(total, per_page) as u64) {
            report.push(path, "pagination.total_pages is inconsistent");
        }
        let expected = latest_date(items).map(|d| d.format("%Y-%m-%d").to_string());
        let actual = fields.get("updated_at").and_then(Value::as_str).map(str::to_string);
        if expected != actual {
            report.push(path, "updated_at is not the latest item date");
        }
    }

    let mut seen = HashSet::with_capacity(total);
    for item in items {
        let key = identity(item);
        if !seen.insert(key.clone()) {
            report.push(path, format!("duplicate item {}", key));
        }
    }

    if items.windows(2).any(|pair| date_key(&pair[0]) < date_key(&pair[1])) {
        report.push(path, "items are not ordered newest first");
    }
}

fn check_bucket(report: &mut ValidationReport, path: &Path, coord: &ArchiveCoord) {
    let shard = read_shard(path);
    for item in &shard.items {
        match item_date(item) {
            Some(date) if date.year() == coord.year && date.month() == coord.month => {}
            Some(date) => report.push(path, format!("item dated {} is outside the bucket month", date)),
            None => report.push(path, format!("undated item {} in archive", identity(item))),
        }
    }

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return,
    };
    let mirror = gz_path(path);
    match read_gzip_text(&mirror) {
        Ok(Some(gz)) if gz == text => {}
        Ok(Some(_)) => report.push(&mirror, "gzip mirror differs from JSON"),
        Ok(None) => report.push(&mirror, "gzip mirror is missing"),
        Err(err) => report.push(&mirror, format!("gzip mirror is unreadable: {:#}", err)),
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn check_fresh(report: &mut ValidationReport, path: &Path, expected: &Value) {
    match read_json(path) {
        Some(actual) if &actual == expected => {}
        Some(_) => report.push(path, "out of date; regenerate with `feedshard manifest`"),
        None => report.push(path, "missing or unreadable"),
    }
}

/// Cross-check the archive manifest and summary as written on disk:
/// every summary month must have a manifest entry, every manifest entry
/// must exist on disk with its mirror, and the totals must agree.
fn check_archive_index(report: &mut ValidationReport, archive_dir: &Path) {
    let manifest_path = archive_dir.join(MANIFEST_FILE);
    let summary_path = archive_dir.join(SUMMARY_FILE);
    let manifest: Option<ArchiveManifest> =
        read_json(&manifest_path).and_then(|v| serde_json::from_value(v).ok());
    let summary: Option<Summary> = read_json(&summary_path).and_then(|v| serde_json::from_value(v).ok());
    let (Some(manifest), Some(summary)) = (manifest, summary) else {
        return;
    };

    let mut index = BTreeSet::new();
    let mut manifest_items = 0;
    for entry in &manifest.shards {
        manifest_items += entry.items;
        if !index.insert((entry.parent.clone(), entry.child.clone(), entry.year, entry.month)) {
            report.push(
                &manifest_path,
                format!("duplicate entry for {} {:04}-{:02}", entry.slug, entry.year, entry.month),
            );
        }
        let bucket = archive_dir.join(&entry.path);
        if !bucket.is_file() {
            report.push(&manifest_path, format!("{} does not exist", entry.path));
        }
        if !archive_dir.join(&entry.path_gz).is_file() {
            report.push(&manifest_path, format!("{} does not exist", entry.path_gz));
        }
        if entry.path_gz != format!("{}.gz", entry.path) {
            report.push(&manifest_path, format!("{} does not mirror {}", entry.path_gz, entry.path));
        }
    }
    if manifest_items != manifest.total_items {
        report.push(&manifest_path, "total_items is not the sum of shard items");
    }

    let mut summary_items = 0;
    for parent in &summary.parents {
        summary_items += parent.items;
        for child in &parent.children {
            let months = child.months.as_deref().unwrap_or_default();
            if months.is_empty() {
                report.push(
                    &summary_path,
                    format!("{}/{} has no months", parent.parent, child.child),
                );
            }
            for month in months {
                let key = (parent.parent.clone(), child.child.clone(), month.year, month.month);
                if !index.contains(&key) {
                    report.push(
                        &summary_path,
                        format!(
                            "{} {:04}-{:02} has no manifest entry",
                            child.slug, month.year, month.month
                        ),
                    );
                }
            }
        }
    }
    if summary_items != summary.total_items || summary.total_items != manifest.total_items {
        report.push(&summary_path, "total_items disagrees with the manifest");
    }
}
