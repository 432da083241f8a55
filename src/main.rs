//! # feedshard CLI
//!
//! The `feedshard` binary drives the hot/archive shard store: ingesting
//! post batches, rotating aged items into the archive, regenerating
//! manifests, building the posts index and validating the trees.
//!
//! ## Usage
//!
//! ```bash
//! feedshard --config ./config/feedshard.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `feedshard ingest <batch.json>` | Merge a batch of post records into hot shards |
//! | `feedshard rotate` | Move aged hot items into monthly archive buckets |
//! | `feedshard manifest` | Regenerate hot and archive manifests/summaries |
//! | `feedshard posts` | Build the flat posts index |
//! | `feedshard validate` | Check shard and manifest consistency |
//! | `feedshard stats` | Print a hot/archive breakdown |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest a pulled batch into the tech/ai bucket
//! feedshard ingest pulled.json --category tech/ai
//!
//! # Preview a rotation as of a fixed date
//! feedshard rotate --current-date 2024-05-10 --dry-run
//!
//! # Nightly rotation with a 45-day window
//! HOT_RETENTION_DAYS=45 feedshard rotate
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use feedshard::config::{self, Config};
use feedshard::ingest::{self, IngestOptions};
use feedshard::manifest::write_manifests;
use feedshard::posts::{self, PostsOptions};
use feedshard::progress::ProgressMode;
use feedshard::rotate::{self, RotateOptions};
use feedshard::shard::ShardStore;
use feedshard::stats;
use feedshard::validate;

/// feedshard: a rolling hot/archive JSON shard store for feed posts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without it, `./config/feedshard.toml` is used when present and
/// built-in defaults otherwise.
#[derive(Parser)]
#[command(
    name = "feedshard",
    about = "feedshard — a rolling hot/archive JSON shard store for feed posts",
    version,
    long_about = "feedshard merges normalized feed posts into paginated per-category JSON shards, \
    rotates aged items into monthly archive buckets with gzip mirrors, and keeps manifests and \
    summaries consistent with what is on disk."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Shard tree locations shared by most commands.
#[derive(clap::Args, Clone, Debug, Default)]
struct TreeArgs {
    /// Hot shards directory (default from `[paths].hot_dir`).
    #[arg(long)]
    hot_dir: Option<PathBuf>,

    /// Archive directory (default from `[paths].archive_dir`).
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Page size used for pagination counts.
    #[arg(long)]
    per_page: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Move aged hot items into monthly archive buckets.
    ///
    /// Items dated strictly before `current date - retention days` are
    /// merged into `archive/<parent>/<child>/<yyyy>/<mm>/index.json` (with a
    /// gzip mirror) and removed from their hot shard. Manifests are
    /// regenerated afterwards unless `--dry-run` is given.
    Rotate {
        #[command(flatten)]
        tree: TreeArgs,

        /// Days of content to keep hot.
        #[arg(long, allow_negative_numbers = true)]
        retention_days: Option<i64>,

        /// Override today's date (YYYY-MM-DD).
        #[arg(long)]
        current_date: Option<String>,

        /// Compute the rotation without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Merge a batch of raw post records into hot shards.
    ///
    /// The batch is a JSON array of records or an object holding them under
    /// `items`, `entries`, `posts` or `data`.
    Ingest {
        /// Batch file.
        input: PathBuf,

        /// Category (`parent[/child]`) assigned to every record in the batch.
        #[arg(long)]
        category: Option<String>,

        /// Hot shards directory (default from `[paths].hot_dir`).
        #[arg(long)]
        hot_dir: Option<PathBuf>,

        /// Page size used for pagination counts.
        #[arg(long)]
        per_page: Option<usize>,

        /// Hot shard capacity (`0` for unbounded).
        #[arg(long)]
        max_items: Option<usize>,

        /// Date assigned to undated records (YYYY-MM-DD).
        #[arg(long)]
        current_date: Option<String>,

        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Regenerate manifest.json and summary.json for both trees.
    Manifest {
        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Build the flat newest-first posts index from the hot tree.
    Posts {
        /// Hot shards directory (default from `[paths].hot_dir`).
        #[arg(long)]
        hot_dir: Option<PathBuf>,

        /// Output file (default from `[paths].posts_path`).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Maximum number of posts.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,

        /// Taxonomy file providing category titles.
        #[arg(long)]
        taxonomy: Option<PathBuf>,
    },

    /// Check shard invariants and manifest consistency.
    ///
    /// Exits non-zero when any issue is found.
    Validate {
        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Print a hot/archive breakdown.
    Stats {
        #[command(flatten)]
        tree: TreeArgs,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_current_date(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        Some(text) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
            .with_context(|| format!("Invalid --current-date value: '{}' (expected YYYY-MM-DD)", text)),
        None => Ok(Utc::now().date_naive()),
    }
}

/// Apply the shared tree flags over the config and re-validate.
fn apply_tree(cfg: &mut Config, tree: &TreeArgs) -> Result<()> {
    if let Some(dir) = &tree.hot_dir {
        cfg.paths.hot_dir = dir.clone();
    }
    if let Some(dir) = &tree.archive_dir {
        cfg.paths.archive_dir = dir.clone();
    }
    if let Some(per_page) = tree.per_page {
        cfg.rotation.per_page = per_page;
    }
    cfg.validate()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut cfg = config::resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Rotate {
            tree,
            retention_days,
            current_date,
            dry_run,
            progress,
        } => {
            if let Some(days) = retention_days {
                if days < 0 {
                    bail!("--retention-days must be >= 0 (got {})", days);
                }
                cfg.rotation.retention_days = days;
            }
            apply_tree(&mut cfg, &tree)?;
            let current_date = parse_current_date(current_date.as_deref())?;

            let opts = RotateOptions {
                hot_dir: cfg.paths.hot_dir.clone(),
                archive_dir: cfg.paths.archive_dir.clone(),
                retention_days: cfg.rotation.retention_days,
                current_date,
                default_child: cfg.default_child(),
            };
            let store = ShardStore::new(cfg.rotation.per_page, dry_run);
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();

            let stats = rotate::rotate(&opts, &store, reporter.as_ref())?;
            if !dry_run {
                write_manifests(&opts.hot_dir, &opts.archive_dir, &opts.default_child, &store)?;
            }
            eprintln!("{}", stats.summary_line());
        }
        Commands::Ingest {
            input,
            category,
            hot_dir,
            per_page,
            max_items,
            current_date,
            dry_run,
        } => {
            if let Some(dir) = hot_dir {
                cfg.paths.hot_dir = dir;
            }
            if let Some(per_page) = per_page {
                cfg.rotation.per_page = per_page;
            }
            if let Some(max_items) = max_items {
                cfg.hot.max_items = max_items;
            }
            cfg.validate()?;

            let router = cfg.router()?;
            let opts = IngestOptions {
                hot_dir: cfg.paths.hot_dir.clone(),
                current_date: parse_current_date(current_date.as_deref())?,
                category,
                max_items: cfg.hot.max_items,
            };
            let store = ShardStore::new(cfg.rotation.per_page, dry_run);
            let records = ingest::load_batch(&input)?;
            let report = ingest::ingest(records, &opts, &router, &store)?;
            if !dry_run {
                write_manifests(
                    &cfg.paths.hot_dir,
                    &cfg.paths.archive_dir,
                    router.default_child(),
                    &store,
                )?;
            }

            println!("ingest {}{}", input.display(), if dry_run { " (dry-run)" } else { "" });
            println!("  records: {}", report.records);
            println!("  rejected: {}", report.rejected);
            println!("  shards: {}", report.shards);
            println!("  added: {}", report.added);
            println!("  shards written: {}", report.written);
            if report.skipped > 0 {
                println!("  shards skipped (unreadable): {}", report.skipped);
            }
            println!("ok");
        }
        Commands::Manifest { tree } => {
            apply_tree(&mut cfg, &tree)?;
            let store = ShardStore::new(cfg.rotation.per_page, false);
            let writes = write_manifests(
                &cfg.paths.hot_dir,
                &cfg.paths.archive_dir,
                &cfg.default_child(),
                &store,
            )?;
            println!("manifest");
            println!("  hot items: {}", writes.hot_total);
            println!("  archive items: {}", writes.archive_total);
            println!(
                "  files written: {}",
                [
                    writes.hot_manifest,
                    writes.hot_summary,
                    writes.archive_manifest,
                    writes.archive_summary
                ]
                .iter()
                .filter(|changed| **changed)
                .count()
            );
            println!("ok");
        }
        Commands::Posts {
            hot_dir,
            output,
            limit,
            taxonomy,
        } => {
            if let Some(dir) = hot_dir {
                cfg.paths.hot_dir = dir;
            }
            let output = output.unwrap_or_else(|| cfg.paths.posts_path.clone());
            let limit = match limit {
                Some(limit) => usize::try_from(limit).context("--limit is too large")?,
                None => cfg.posts.limit,
            };
            let opts = PostsOptions {
                hot_dir: cfg.paths.hot_dir.clone(),
                taxonomy_path: taxonomy.or_else(|| cfg.paths.taxonomy_path.clone()),
                limit,
                default_child: cfg.default_child(),
                rollup: cfg.router()?.rollup().map(str::to_string),
            };
            let store = ShardStore::new(cfg.rotation.per_page, false);
            let (count, _) = posts::write_posts(&opts, &output, &store)?;
            println!("Wrote {} posts to {}", count, output.display());
        }
        Commands::Validate { tree } => {
            apply_tree(&mut cfg, &tree)?;
            let report = validate::validate(
                &cfg.paths.hot_dir,
                &cfg.paths.archive_dir,
                cfg.rotation.per_page,
                &cfg.default_child(),
            )?;
            for issue in &report.issues {
                println!("  {}", issue);
            }
            println!(
                "validate: {} hot shards, {} archive buckets, {} issue(s)",
                report.hot_shards,
                report.archive_buckets,
                report.issues.len()
            );
            if !report.is_ok() {
                bail!("validation failed with {} issue(s)", report.issues.len());
            }
            println!("ok");
        }
        Commands::Stats { tree } => {
            apply_tree(&mut cfg, &tree)?;
            stats::run_stats(
                &cfg.paths.hot_dir,
                &cfg.paths.archive_dir,
                cfg.rotation.per_page,
                &cfg.default_child(),
            )?;
        }
    }

    Ok(())
}
