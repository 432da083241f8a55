//! Hot to archive rotation.
//!
//! Every hot shard goes through the same phases:
//!
//! ```text
//! SCANNED ─▶ PARTITIONED ─▶ ARCHIVED (0..n buckets) ─▶ HOT_REWRITTEN ─▶ DONE
//! ```
//!
//! Items dated strictly before `current_date - retention_days` leave the
//! hot shard and are merged into `archive/<parent>/<child>/<yyyy>/<mm>/`
//! buckets; everything else, undated items included, stays hot. Buckets are
//! written before the hot shard is rewritten, and the merge engine dedups
//! against whatever a bucket already holds, so a run that fails or is
//! interrupted part way loses nothing and the next run completes it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use feedshard_core::dates::item_date;
use feedshard_core::merge::{merge, normalize_items};
use feedshard_core::router::HotCoord;

use crate::progress::{RotateProgressEvent, RotateProgressReporter};
use crate::shard::{list_shards, read_shard, relative_parts, ShardOrigin, ShardStore};

/// Inputs of a rotation run.
#[derive(Debug, Clone)]
pub struct RotateOptions {
    pub hot_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub retention_days: i64,
    pub current_date: NaiveDate,
    /// Child marker used for shards stored directly under their parent.
    pub default_child: String,
}

/// Telemetry about a rotation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationStats {
    pub processed_shards: usize,
    pub archived_items: usize,
    /// Distinct archive buckets that received items.
    pub archive_buckets: usize,
    /// Archived items whose identity was new to their bucket.
    pub archive_added: usize,
    pub hot_items_remaining: usize,
}

impl RotationStats {
    pub fn summary_line(&self) -> String {
        format!(
            "[rotate] processed={} archived={} buckets={} hot_remaining={} added={}",
            self.processed_shards,
            self.archived_items,
            self.archive_buckets,
            self.hot_items_remaining,
            self.archive_added
        )
    }
}

/// Lifecycle of one shard within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardPhase {
    Scanned { items: usize },
    Partitioned { kept: usize, aged: usize },
    HotRewritten { changed: bool },
    Archived { bucket: PathBuf, items: usize },
    Done,
}

/// First date that stays hot. Fails on a negative retention window.
pub fn cutoff(current_date: NaiveDate, retention_days: i64) -> Result<NaiveDate> {
    if retention_days < 0 {
        bail!("retention_days must be >= 0 (got {})", retention_days);
    }
    current_date
        .checked_sub_days(Days::new(retention_days.unsigned_abs()))
        .with_context(|| format!("retention window of {} days is out of range", retention_days))
}

/// Split items into `(kept, aged)`. Only dated items strictly before
/// `cutoff` age out; relative order is preserved on both sides.
pub fn partition(items: Vec<Value>, cutoff: NaiveDate) -> (Vec<Value>, Vec<(NaiveDate, Value)>) {
    let mut kept = Vec::new();
    let mut aged = Vec::new();
    for item in items {
        match item_date(&item) {
            Some(date) if date < cutoff => aged.push((date, item)),
            _ => kept.push(item),
        }
    }
    (kept, aged)
}

/// Rotate every hot shard below `opts.hot_dir`.
///
/// Shards are visited in sorted path order. The store decides whether
/// anything is written; a dry-run store produces identical statistics.
pub fn rotate(
    opts: &RotateOptions,
    store: &ShardStore,
    progress: &dyn RotateProgressReporter,
) -> Result<RotationStats> {
    let cutoff = cutoff(opts.current_date, opts.retention_days)?;
    tracing::info!(
        hot_dir = %opts.hot_dir.display(),
        archive_dir = %opts.archive_dir.display(),
        %cutoff,
        dry_run = store.is_dry_run(),
        "starting rotation"
    );

    progress.report(RotateProgressEvent::Discovering {
        hot_dir: opts.hot_dir.display().to_string(),
    });
    let shards = list_shards(&opts.hot_dir)?;
    let total = shards.len() as u64;

    let mut stats = RotationStats::default();
    let mut touched: BTreeSet<PathBuf> = BTreeSet::new();

    for (idx, shard_path) in shards.iter().enumerate() {
        let parts = relative_parts(&opts.hot_dir, shard_path);
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
        let coord = match HotCoord::from_relative(&parts, &opts.default_child) {
            Some(coord) => coord,
            None => {
                tracing::debug!(path = %shard_path.display(), "skipping shard without a parent segment");
                continue;
            }
        };

        let outcome = rotate_shard(opts, store, shard_path, &coord, cutoff, &mut touched)?;
        stats.processed_shards += 1;
        stats.archived_items += outcome.archived;
        stats.archive_added += outcome.added;
        stats.hot_items_remaining += outcome.kept;

        progress.report(RotateProgressEvent::Rotating {
            shard: coord.slug(&opts.default_child),
            n: idx as u64 + 1,
            total,
            archived: stats.archived_items as u64,
        });
    }

    stats.archive_buckets = touched.len();
    progress.report(RotateProgressEvent::Finished {
        shards: stats.processed_shards as u64,
        archived: stats.archived_items as u64,
        buckets: stats.archive_buckets as u64,
        added: stats.archive_added as u64,
    });
    tracing::info!(?stats, "rotation finished");
    Ok(stats)
}

struct ShardOutcome {
    kept: usize,
    archived: usize,
    added: usize,
}

fn rotate_shard(
    opts: &RotateOptions,
    store: &ShardStore,
    shard_path: &Path,
    coord: &HotCoord,
    cutoff: NaiveDate,
    touched: &mut BTreeSet<PathBuf>,
) -> Result<ShardOutcome> {
    let shard = read_shard(shard_path);
    log_phase(shard_path, ShardPhase::Scanned {
        items: shard.items.len(),
    });
    if shard.origin == ShardOrigin::Unreadable {
        // Left in place for an operator to repair.
        tracing::warn!(shard = %shard_path.display(), "skipping unreadable hot shard");
        log_phase(shard_path, ShardPhase::Done);
        return Ok(ShardOutcome {
            kept: 0,
            archived: 0,
            added: 0,
        });
    }

    let (kept, aged) = partition(normalize_items(shard.items), cutoff);
    log_phase(shard_path, ShardPhase::Partitioned {
        kept: kept.len(),
        aged: aged.len(),
    });

    let mut outcome = ShardOutcome {
        kept: kept.len(),
        archived: aged.len(),
        added: 0,
    };

    let mut groups: BTreeMap<(i32, u32), Vec<Value>> = BTreeMap::new();
    for (date, item) in aged {
        groups
            .entry((date.year(), date.month()))
            .or_default()
            .push(item);
    }

    let target = archive_target(shard_path, coord);
    // Buckets first: the hot shard only drops aged items once they are archived.
    for ((year, month), items) in groups {
        let bucket_path = target.archive(year, month).bucket_path(&opts.archive_dir);
        let count = items.len();
        let bucket = read_shard(&bucket_path);
        let merged = merge(bucket.items, items, 0);
        outcome.added += merged.added;

        if merged.items.is_empty() {
            store.remove_bucket(&bucket_path)?;
        } else {
            store.write_bucket(&bucket_path, &merged.items, &bucket.template)?;
        }
        log_phase(shard_path, ShardPhase::Archived {
            bucket: bucket_path.clone(),
            items: count,
        });
        touched.insert(bucket_path);
    }

    let changed = store.write_shard(shard_path, &kept, &shard.template)?;
    log_phase(shard_path, ShardPhase::HotRewritten { changed });

    log_phase(shard_path, ShardPhase::Done);
    Ok(outcome)
}

/// Archive coordinate for a hot shard, with path segments normalized to
/// kebab-case. Falls back to the on-disk segments when they normalize to
/// nothing.
fn archive_target(shard_path: &Path, coord: &HotCoord) -> HotCoord {
    match coord.normalized() {
        Some(normalized) if normalized == *coord => normalized,
        Some(normalized) => {
            tracing::warn!(
                shard = %shard_path.display(),
                archive = ?normalized,
                "hot shard path is not kebab-case; archiving under the normalized name"
            );
            normalized
        }
        None => {
            tracing::warn!(shard = %shard_path.display(), "hot shard path has no usable slug; archiving as found");
            coord.clone()
        }
    }
}

fn log_phase(shard: &Path, phase: ShardPhase) {
    tracing::debug!(shard = %shard.display(), ?phase, "shard phase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_cutoff() {
        assert_eq!(cutoff(ymd(2024, 5, 10), 7).unwrap(), ymd(2024, 5, 3));
        assert_eq!(cutoff(ymd(2024, 5, 10), 0).unwrap(), ymd(2024, 5, 10));
        assert!(cutoff(ymd(2024, 5, 10), -1).is_err());
    }

    #[test]
    fn test_partition_boundary_is_strict() {
        let items = vec![
            json!({"slug": "at-cutoff", "date": "2024-05-03"}),
            json!({"slug": "before", "date": "2024-05-02"}),
            json!({"slug": "undated"}),
        ];
        let (kept, aged) = partition(items, ymd(2024, 5, 3));
        assert_eq!(kept.len(), 2);
        assert_eq!(aged.len(), 1);
        assert_eq!(aged[0].0, ymd(2024, 5, 2));
        assert_eq!(aged[0].1["slug"], "before");
    }

    #[test]
    fn test_summary_line() {
        let stats = RotationStats {
            processed_shards: 2,
            archived_items: 3,
            archive_buckets: 1,
            archive_added: 3,
            hot_items_remaining: 4,
        };
        assert_eq!(
            stats.summary_line(),
            "[rotate] processed=2 archived=3 buckets=1 hot_remaining=4 added=3"
        );
    }
}
