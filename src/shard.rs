//! Shard store: reading, rendering and writing shard files.
//!
//! A shard is one JSON document holding a list of items, either as a bare
//! array or wrapped in an object under `items`, `entries`, `posts` or
//! `data`. The shape found on disk is captured as a [`ShardTemplate`] and
//! reproduced on write, together with any extra top-level keys.
//!
//! Reads never fail on content problems: a missing, corrupt or oddly
//! shaped file yields an empty shard (after trying the `.gz` mirror).
//! Writes only touch disk when the serialized bytes differ, and go through
//! a temp file in the target directory followed by a rename.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use feedshard_core::dates::item_date;
use feedshard_core::router::SHARD_FILE;

/// Object keys that may hold the item array, in lookup order.
pub const ITEM_KEYS: &[&str] = &["items", "entries", "posts", "data"];

/// Container shape of a shard file.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardTemplate {
    /// A bare JSON array of items.
    Bare,
    /// An object holding the items under `key`. `fields` keeps every
    /// top-level key seen on disk, in file order.
    Wrapped { key: String, fields: Map<String, Value> },
}

impl Default for ShardTemplate {
    fn default() -> Self {
        ShardTemplate::Wrapped {
            key: "items".to_string(),
            fields: Map::new(),
        }
    }
}

/// Where the items of a [`Shard`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardOrigin {
    /// Neither the file nor its mirror exists.
    Missing,
    /// Decoded from the JSON file.
    Primary,
    /// Decoded from the `.gz` mirror.
    Mirror,
    /// Something exists on disk but nothing could be decoded.
    Unreadable,
}

#[derive(Debug, Clone)]
pub struct Shard {
    pub items: Vec<Value>,
    pub template: ShardTemplate,
    pub origin: ShardOrigin,
}

impl Shard {
    fn empty(origin: ShardOrigin) -> Self {
        Self {
            items: Vec::new(),
            template: ShardTemplate::default(),
            origin,
        }
    }
}

/// Path of the gzip mirror next to `path`.
pub fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

/// Read a shard, falling back to its `.gz` mirror when the primary file is
/// missing or cannot be decoded.
pub fn read_shard(path: &Path) -> Shard {
    let primary = read_primary(path);
    if let Some(payload) = primary.payload {
        if let Some(shard) = extract(payload, ShardOrigin::Primary) {
            return shard;
        }
        tracing::warn!(path = %path.display(), "shard root is neither an array nor an object; ignoring");
    }

    let mirror = gz_path(path);
    match read_gzip_json(&mirror) {
        Ok(Some(payload)) => {
            if primary.existed {
                tracing::warn!(path = %path.display(), "using gzip mirror of unreadable shard");
            }
            extract(payload, ShardOrigin::Mirror).unwrap_or_else(|| {
                tracing::warn!(path = %mirror.display(), "mirror root is neither an array nor an object; ignoring");
                Shard::empty(ShardOrigin::Unreadable)
            })
        }
        Ok(None) if primary.existed => Shard::empty(ShardOrigin::Unreadable),
        Ok(None) => Shard::empty(ShardOrigin::Missing),
        Err(err) => {
            tracing::warn!(path = %mirror.display(), error = %err, "ignoring unreadable gzip mirror");
            Shard::empty(ShardOrigin::Unreadable)
        }
    }
}

struct PrimaryRead {
    existed: bool,
    payload: Option<Value>,
}

fn read_primary(path: &Path) -> PrimaryRead {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return PrimaryRead {
                existed: false,
                payload: None,
            }
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot read shard; ignoring");
            return PrimaryRead {
                existed: true,
                payload: None,
            };
        }
    };
    let payload = match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "shard is not valid JSON; ignoring");
            None
        }
    };
    PrimaryRead {
        existed: true,
        payload,
    }
}

/// Decode a gzip-compressed JSON file. `Ok(None)` when it does not exist;
/// decoding problems are errors for the caller to log.
pub fn read_gzip_json(path: &Path) -> Result<Option<Value>> {
    match read_gzip_text(path)? {
        Some(text) => {
            let value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Decompress a gzip file to text. `Ok(None)` when it does not exist.
pub fn read_gzip_text(path: &Path) -> Result<Option<String>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to open {}", path.display()))
        }
    };
    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .with_context(|| format!("Failed to decompress {}", path.display()))?;
    Ok(Some(text))
}

/// Split a decoded payload into items and template. Returns `None` for
/// roots that are neither arrays nor objects.
pub fn extract(payload: Value, origin: ShardOrigin) -> Option<Shard> {
    match payload {
        Value::Array(items) => Some(Shard {
            items,
            template: ShardTemplate::Bare,
            origin,
        }),
        Value::Object(mut fields) => {
            let key = ITEM_KEYS
                .iter()
                .find(|key| matches!(fields.get(**key), Some(Value::Array(_))))
                .map(|key| key.to_string());
            let (key, items) = match key {
                Some(key) => {
                    let items = match fields.get_mut(&key).map(Value::take) {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    (key, items)
                }
                None => ("items".to_string(), Vec::new()),
            };
            Some(Shard {
                items,
                template: ShardTemplate::Wrapped { key, fields },
                origin,
            })
        }
        _ => None,
    }
}

/// `ceil(total / per_page)`, or `total` when `per_page` is zero.
pub fn calc_pages(total: usize, per_page: usize) -> usize {
    if per_page == 0 {
        return total;
    }
    total.div_ceil(per_page)
}

/// Latest item date, if any item is dated.
pub fn latest_date(items: &[Value]) -> Option<NaiveDate> {
    items.iter().filter_map(item_date).max()
}

/// Earliest item date, if any item is dated.
pub fn earliest_date(items: &[Value]) -> Option<NaiveDate> {
    items.iter().filter_map(item_date).min()
}

/// Build the on-disk payload for `items` in the shape of `template`.
pub fn render(items: &[Value], template: &ShardTemplate, per_page: usize) -> Value {
    match template {
        ShardTemplate::Bare => Value::Array(items.to_vec()),
        ShardTemplate::Wrapped { key, fields } => {
            let mut payload = fields.clone();
            let total = items.len();
            payload.insert(key.clone(), Value::Array(items.to_vec()));
            payload.insert("count".to_string(), json!(total));
            payload.insert(
                "updated_at".to_string(),
                latest_date(items)
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .unwrap_or(Value::Null),
            );
            payload.insert(
                "pagination".to_string(),
                json!({
                    "total_items": total,
                    "per_page": per_page,
                    "total_pages": calc_pages(total, per_page),
                }),
            );
            Value::Object(payload)
        }
    }
}

/// Serialize as 2-space pretty JSON with a trailing newline.
pub fn to_text<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut text = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    text.push('\n');
    Ok(text)
}

/// Every `index.json` below `root`, in sorted path order.
pub fn list_shards(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut shards = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.file_type().is_file() && entry.file_name() == SHARD_FILE {
            shards.push(entry.into_path());
        }
    }
    shards.sort();
    Ok(shards)
}

/// Path components of `path` relative to `root`.
pub fn relative_parts(root: &Path, path: &Path) -> Vec<String> {
    path.strip_prefix(root)
        .unwrap_or(path)
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect()
}

/// Writes shards and derived files. A dry-run store answers every
/// "would this change?" question exactly as a real one but never writes.
#[derive(Debug, Clone)]
pub struct ShardStore {
    per_page: usize,
    dry_run: bool,
}

impl ShardStore {
    pub fn new(per_page: usize, dry_run: bool) -> Self {
        Self { per_page, dry_run }
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Render and write a hot shard. Returns whether the file changed.
    pub fn write_shard(&self, path: &Path, items: &[Value], template: &ShardTemplate) -> Result<bool> {
        let text = to_text(&render(items, template, self.per_page))?;
        self.write_text(path, &text)
    }

    /// Render and write an archive bucket plus its gzip mirror.
    ///
    /// The mirror is rewritten whenever its decompressed content differs
    /// from the JSON text, which also heals a missing or stale mirror.
    pub fn write_bucket(&self, path: &Path, items: &[Value], template: &ShardTemplate) -> Result<bool> {
        let text = to_text(&render(items, template, self.per_page))?;
        let json_changed = self.write_text(path, &text)?;

        let mirror = gz_path(path);
        let mirror_current = matches!(read_gzip_text(&mirror), Ok(Some(existing)) if existing == text);
        if mirror_current {
            return Ok(json_changed);
        }
        if !self.dry_run {
            write_gzip_atomic(&mirror, text.as_bytes())?;
        }
        Ok(true)
    }

    /// Serialize any value (manifests, posts index) and write it if changed.
    pub fn write_serialized<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<bool> {
        let text = to_text(value)?;
        self.write_text(path, &text)
    }

    /// Remove a bucket and its mirror. Missing files are not errors.
    /// Returns whether anything was (or would be) removed.
    pub fn remove_bucket(&self, path: &Path) -> Result<bool> {
        let mut removed = false;
        for target in [path.to_path_buf(), gz_path(path)] {
            if !target.exists() {
                continue;
            }
            removed = true;
            if self.dry_run {
                continue;
            }
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("Failed to remove {}", target.display()))
                }
            }
        }
        Ok(removed)
    }

    fn write_text(&self, path: &Path, text: &str) -> Result<bool> {
        match fs::read(path) {
            Ok(current) if current == text.as_bytes() => return Ok(false),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        }
        if !self.dry_run {
            write_atomic(path, text.as_bytes())?;
        }
        Ok(true)
    }
}

fn temp_beside(path: &Path) -> Result<NamedTempFile> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))
}

fn persist(temp: NamedTempFile, path: &Path) -> Result<()> {
    temp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    temp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp = temp_beside(path)?;
    temp.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    persist(temp, path)
}

fn write_gzip_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp = temp_beside(path)?;
    {
        let mut encoder = GzBuilder::new()
            .mtime(0)
            .write(temp.as_file(), Compression::default());
        encoder
            .write_all(bytes)
            .with_context(|| format!("Failed to compress {}", path.display()))?;
        encoder
            .finish()
            .with_context(|| format!("Failed to compress {}", path.display()))?;
    }
    persist(temp, path)
}
