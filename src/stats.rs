//! Store statistics and health overview.
//!
//! Provides a quick summary of what the hot and archive trees hold: item
//! and shard counts, per-parent breakdowns and on-disk size. Used by
//! `feedshard stats` to give confidence that ingest and rotation are doing
//! what they should.

use std::path::Path;

use anyhow::Result;
use walkdir::WalkDir;

use crate::manifest::{build_archive, build_hot, Summary};

/// Run the stats command: rebuild the roll-ups from disk and print them.
pub fn run_stats(hot_dir: &Path, archive_dir: &Path, per_page: usize, default_child: &str) -> Result<()> {
    let (hot_manifest, hot_summary) = build_hot(hot_dir, per_page, default_child)?;
    let (archive_manifest, archive_summary) = build_archive(archive_dir, per_page, default_child)?;

    println!("feedshard — Store Stats");
    println!("=======================");
    println!();
    println!("  Hot:         {}", hot_dir.display());
    println!("  Size:        {}", format_bytes(dir_size(hot_dir)));
    println!("  Shards:      {}", hot_manifest.shards.len());
    println!("  Items:       {}", hot_manifest.total_items);
    println!(
        "  Newest:      {}",
        hot_manifest.generated_at.as_deref().unwrap_or("-")
    );
    println!();
    println!("  Archive:     {}", archive_dir.display());
    println!("  Size:        {}", format_bytes(dir_size(archive_dir)));
    println!("  Buckets:     {}", archive_manifest.shards.len());
    println!("  Items:       {}", archive_manifest.total_items);
    let months = archive_manifest.shards.iter().map(|s| (s.year, s.month));
    if let (Some(first), Some(last)) = (months.clone().min(), months.max()) {
        println!(
            "  Months:      {:04}-{:02} .. {:04}-{:02}",
            first.0, first.1, last.0, last.1
        );
    }

    print_breakdown(&hot_summary, &archive_summary);
    println!();
    Ok(())
}

/// Per-parent rows joined across hot and archive.
struct ParentRow {
    parent: String,
    hot_items: usize,
    hot_pages: usize,
    archive_items: usize,
    months: usize,
}

fn breakdown(hot: &Summary, archive: &Summary) -> Vec<ParentRow> {
    let mut rows: Vec<ParentRow> = hot
        .parents
        .iter()
        .map(|p| ParentRow {
            parent: p.parent.clone(),
            hot_items: p.items,
            hot_pages: p.pages,
            archive_items: 0,
            months: 0,
        })
        .collect();

    for p in &archive.parents {
        let months = p
            .children
            .iter()
            .map(|c| c.months.as_ref().map_or(0, Vec::len))
            .sum();
        match rows.iter_mut().find(|r| r.parent == p.parent) {
            Some(row) => {
                row.archive_items = p.items;
                row.months = months;
            }
            None => rows.push(ParentRow {
                parent: p.parent.clone(),
                hot_items: 0,
                hot_pages: 0,
                archive_items: p.items,
                months,
            }),
        }
    }

    rows.sort_by(|a, b| {
        (b.hot_items + b.archive_items)
            .cmp(&(a.hot_items + a.archive_items))
            .then_with(|| a.parent.cmp(&b.parent))
    });
    rows
}

fn print_breakdown(hot: &Summary, archive: &Summary) {
    let rows = breakdown(hot, archive);
    if rows.is_empty() {
        return;
    }
    println!();
    println!("  By parent:");
    println!(
        "  {:<24} {:>8} {:>6} {:>10} {:>7}",
        "PARENT", "HOT", "PAGES", "ARCHIVED", "MONTHS"
    );
    println!("  {}", "-".repeat(59));
    for r in &rows {
        println!(
            "  {:<24} {:>8} {:>6} {:>10} {:>7}",
            r.parent, r.hot_items, r.hot_pages, r.archive_items, r.months
        );
    }
}

/// Total size of all files below `root`.
fn dir_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ChildSummary, MonthSummary, ParentSummary};

    fn summary(parents: Vec<ParentSummary>) -> Summary {
        Summary {
            generated_at: None,
            per_page: 12,
            total_items: parents.iter().map(|p| p.items).sum(),
            parents,
        }
    }

    fn parent(name: &str, items: usize, months: Option<usize>) -> ParentSummary {
        ParentSummary {
            parent: name.to_string(),
            items,
            pages: items.div_ceil(12),
            children: vec![ChildSummary {
                child: "index".to_string(),
                slug: name.to_string(),
                items,
                pages: items.div_ceil(12),
                months: months.map(|n| {
                    (1..=n as u32)
                        .map(|m| MonthSummary {
                            year: 2024,
                            month: m,
                            items: 1,
                            pages: 1,
                        })
                        .collect()
                }),
            }],
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_breakdown_joins_hot_and_archive() {
        let hot = summary(vec![parent("news", 3, None), parent("tech", 20, None)]);
        let archive = summary(vec![parent("news", 30, Some(2)), parent("old", 1, Some(1))]);
        let rows = breakdown(&hot, &archive);
        let names: Vec<&str> = rows.iter().map(|r| r.parent.as_str()).collect();
        assert_eq!(names, vec!["news", "tech", "old"]);
        assert_eq!(rows[0].archive_items, 30);
        assert_eq!(rows[0].months, 2);
        assert_eq!(rows[2].hot_items, 0);
    }

    #[test]
    fn test_dir_size_of_missing_dir_is_zero() {
        assert_eq!(dir_size(Path::new("/definitely/not/here")), 0);
    }
}
