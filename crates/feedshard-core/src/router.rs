//! Bucket coordinates and the hot bucket router.
//!
//! Hot shards live at `hot/<parent>/index.json` (default child) or
//! `hot/<parent>/<child>/index.json`. Archive buckets live at
//! `archive/<parent>/<child>/<yyyy>/<mm>/index.json`, where the default
//! child is spelled out as a directory.
//!
//! All path segments are lowercase kebab-case slugs. Children may span
//! several segments (`tech/ai/llm` has parent `tech` and child `ai/llm`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::models::PostRecord;

/// File name of every shard and bucket.
pub const SHARD_FILE: &str = "index.json";

/// Lowercase `value` and collapse runs of anything outside `[a-z0-9]` to
/// a single `-`, trimming leading and trailing dashes.
pub fn slugify_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    out
}

/// True when `value` is a non-empty kebab-case slug, optionally made of
/// several `/`-separated segments.
pub fn is_kebab_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .split('/')
            .all(|segment| !segment.is_empty() && slugify_segment(segment) == segment)
}

/// Split `parent[/child...]` into a normalized `(parent, child)` pair.
///
/// Segments are slugified and empty ones dropped. The child is the
/// remainder joined with `/`, or `None` when there is no remainder.
pub fn split_category_slug(value: &str) -> Option<(String, Option<String>)> {
    let mut segments = value
        .split('/')
        .map(slugify_segment)
        .filter(|s| !s.is_empty());
    let parent = segments.next()?;
    let rest: Vec<String> = segments.collect();
    let child = if rest.is_empty() {
        None
    } else {
        Some(rest.join("/"))
    };
    Some((parent, child))
}

/// `parent` for the default child, `parent/child` otherwise.
pub fn display_slug(parent: &str, child: &str, default_child: &str) -> String {
    if child == default_child {
        parent.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Coordinate of a hot shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HotCoord {
    pub parent: String,
    pub child: String,
}

impl HotCoord {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }

    pub fn slug(&self, default_child: &str) -> String {
        display_slug(&self.parent, &self.child, default_child)
    }

    pub fn shard_path(&self, hot_dir: &Path, default_child: &str) -> PathBuf {
        let mut path = hot_dir.join(&self.parent);
        if self.child != default_child {
            for segment in self.child.split('/') {
                path.push(segment);
            }
        }
        path.join(SHARD_FILE)
    }

    /// Parse a shard path relative to the hot root, file name included.
    ///
    /// Returns `None` for a shard directly under the root, which has no
    /// parent segment.
    pub fn from_relative(parts: &[&str], default_child: &str) -> Option<Self> {
        if parts.len() < 2 {
            return None;
        }
        let parent = parts[0].to_string();
        let child = if parts.len() == 2 {
            default_child.to_string()
        } else {
            parts[1..parts.len() - 1].join("/")
        };
        Some(Self { parent, child })
    }

    /// The same coordinate with every segment slugified, or `None` when a
    /// segment has nothing left after slugifying.
    pub fn normalized(&self) -> Option<Self> {
        let parent = slugify_segment(&self.parent);
        let segments: Vec<String> = self.child.split('/').map(slugify_segment).collect();
        if parent.is_empty() || segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self {
            parent,
            child: segments.join("/"),
        })
    }

    pub fn archive(&self, year: i32, month: u32) -> ArchiveCoord {
        ArchiveCoord {
            parent: self.parent.clone(),
            child: self.child.clone(),
            year,
            month,
        }
    }
}

/// Coordinate of an archive bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchiveCoord {
    pub parent: String,
    pub child: String,
    pub year: i32,
    pub month: u32,
}

impl ArchiveCoord {
    pub fn slug(&self, default_child: &str) -> String {
        display_slug(&self.parent, &self.child, default_child)
    }

    pub fn bucket_path(&self, archive_dir: &Path) -> PathBuf {
        let mut path = archive_dir.join(&self.parent);
        for segment in self.child.split('/') {
            path.push(segment);
        }
        path.join(format!("{:04}", self.year))
            .join(format!("{:02}", self.month))
            .join(SHARD_FILE)
    }

    /// Parse a bucket path relative to the archive root, file name
    /// included. Returns `None` unless the path ends in
    /// `<yyyy>/<mm>/index.json` below a parent segment.
    pub fn from_relative(parts: &[&str], default_child: &str) -> Option<Self> {
        let n = parts.len();
        if n < 4 {
            return None;
        }
        let year: i32 = parse_digits(parts[n - 3])?;
        let month: u32 = parse_digits(parts[n - 2])?;
        if !(1..=12).contains(&month) {
            return None;
        }
        let child = if n == 4 {
            default_child.to_string()
        } else {
            parts[1..n - 3].join("/")
        };
        Some(Self {
            parent: parts[0].to_string(),
            child,
            year,
            month,
        })
    }
}

fn parse_digits<T: std::str::FromStr>(raw: &str) -> Option<T> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Maps post records to the hot shards that should hold them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    default_parent: String,
    default_child: String,
    rollup: Option<String>,
}

impl Router {
    /// Build a router. Every slug is normalized; an argument that
    /// normalizes to nothing is an error.
    pub fn new(default_parent: &str, default_child: &str, rollup: Option<&str>) -> Result<Self> {
        let parent = slugify_segment(default_parent);
        if parent.is_empty() {
            bail!("default parent {:?} is not a usable slug", default_parent);
        }
        let child = slugify_segment(default_child);
        if child.is_empty() {
            bail!("default child {:?} is not a usable slug", default_child);
        }
        let rollup = match rollup {
            Some(raw) => {
                let slug = slugify_segment(raw);
                if slug.is_empty() {
                    bail!("roll-up parent {:?} is not a usable slug", raw);
                }
                Some(slug)
            }
            None => None,
        };
        Ok(Self {
            default_parent: parent,
            default_child: child,
            rollup,
        })
    }

    pub fn default_parent(&self) -> &str {
        &self.default_parent
    }

    pub fn default_child(&self) -> &str {
        &self.default_child
    }

    pub fn rollup(&self) -> Option<&str> {
        self.rollup.as_deref()
    }

    /// Resolve the category-specific coordinate of `post`.
    ///
    /// `category_slug` wins, then `category`/`subcategory`, then the
    /// configured defaults.
    pub fn resolve(&self, post: &PostRecord) -> HotCoord {
        let from_slug = post.category_slug.as_deref().and_then(split_category_slug);
        let (parent, child) = match from_slug {
            Some(pair) => pair,
            None => self.from_labels(post),
        };
        let parent = if parent.is_empty() {
            self.default_parent.clone()
        } else {
            parent
        };
        let child = child.unwrap_or_else(|| self.default_child.clone());
        HotCoord::new(parent, child)
    }

    /// All coordinates `post` belongs to: its own bucket first, then the
    /// roll-up bucket when one is configured and differs.
    pub fn route(&self, post: &PostRecord) -> Vec<HotCoord> {
        let specific = self.resolve(post);
        let mut coords = vec![specific];
        if let Some(rollup) = &self.rollup {
            let shared = HotCoord::new(rollup.clone(), self.default_child.clone());
            if !coords.contains(&shared) {
                coords.push(shared);
            }
        }
        coords
    }

    fn from_labels(&self, post: &PostRecord) -> (String, Option<String>) {
        let category = post.category.as_deref().unwrap_or("");
        let sub = post
            .subcategory
            .as_deref()
            .map(slugify_segment)
            .filter(|s| !s.is_empty());
        if category.contains('/') {
            if let Some((parent, child)) = split_category_slug(category) {
                return (parent, child.or(sub));
            }
        }
        (slugify_segment(category), sub)
    }
}
