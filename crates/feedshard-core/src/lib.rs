//! # feedshard Core
//!
//! Pure logic shared by the feedshard pipeline: post normalization, date
//! parsing, identity and ordering policy, the merge engine, and hot/archive
//! bucket routing.
//!
//! This crate performs no filesystem I/O. Shard files, gzip mirrors and
//! manifests are handled by the `feedshard` application crate.

pub mod dates;
pub mod identity;
pub mod merge;
pub mod models;
pub mod router;
