//! # feedshard
//!
//! A rolling, paginated JSON content store for feed posts.
//!
//! Freshly pulled posts are merged into category-specific "hot" shards;
//! on a schedule, items older than the retention window are moved into
//! monthly "archive" buckets with gzip mirrors. Manifests and summaries
//! are regenerated from the final tree so static consumers can paginate
//! without scanning every shard.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │  Pullers    │──▶│   ingest     │──▶│  hot/<parent>/<child>│
//! │ (external)  │   │ norm+route   │   └──────────┬───────────┘
//! └─────────────┘   └──────────────┘              │ rotate
//!                                                 ▼
//!                   ┌──────────────┐   ┌──────────────────────┐
//!                   │  manifest    │◀──│ archive/.../yyyy/mm  │
//!                   │  + summary   │   │  index.json(.gz)     │
//!                   └──────────────┘   └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! feedshard ingest batch.json --category tech/ai
//! feedshard rotate --retention-days 30
//! feedshard validate
//! feedshard posts --output data/posts.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, environment overrides, validation |
//! | [`shard`] | Shard store: shape-preserving reads and atomic writes |
//! | [`ingest`] | Normalize, route and merge posts into hot shards |
//! | [`rotate`] | Move aged hot items into monthly archive buckets |
//! | [`manifest`] | Manifest and summary generation |
//! | [`posts`] | Flat newest-first posts index |
//! | [`validate`] | Consistency checks over both trees |
//! | [`stats`] | Store statistics |
//! | [`progress`] | Rotation progress reporting |
//!
//! Pure logic (dates, identity, merge, routing) lives in `feedshard-core`.

pub mod config;
pub mod ingest;
pub mod manifest;
pub mod posts;
pub mod progress;
pub mod rotate;
pub mod shard;
pub mod stats;
pub mod validate;
