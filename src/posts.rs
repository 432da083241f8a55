//! Posts index generation.
//!
//! Aggregates every hot shard into one newest-first `posts.json` list for
//! consumers that do not want to page through individual shards. A post
//! present in several shards (its own bucket plus a roll-up) is emitted
//! once, preferring the most specific scope.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use feedshard_core::dates::parse_datetime;
use feedshard_core::router::HotCoord;

use crate::shard::{list_shards, read_shard, relative_parts, ShardStore};

/// Date fields consulted for `published_at`, in lookup order.
const POST_DATE_FIELDS: &[&str] = &[
    "published_at",
    "publishedAt",
    "date",
    "updated_at",
    "updatedAt",
    "updated",
    "created_at",
    "createdAt",
    "created",
];

const ID_FIELDS: &[&str] = &["slug", "id", "guid", "url", "canonical", "source"];
const TITLE_FIELDS: &[&str] = &["title", "name", "headline"];
const URL_FIELDS: &[&str] = &["canonical", "url", "permalink", "link"];
const SOURCE_FIELDS: &[&str] = &["source", "original", "url", "link"];
const EXCERPT_FIELDS: &[&str] = &["excerpt", "summary", "description", "subtitle", "dek"];
const THUMBNAIL_FIELDS: &[&str] = &[
    "thumbnail",
    "cover",
    "image",
    "img",
    "picture",
    "image_url",
    "cover_image",
];

/// Child label used for shards stored directly under their parent.
pub const STANDARD_CHILD: &str = "general";

/// One entry of `posts.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub category: String,
    pub subcategory: String,
    pub source: String,
    pub published_at: String,
    pub excerpt: String,
    pub thumbnail: String,
}

#[derive(Debug, Clone)]
pub struct PostsOptions {
    pub hot_dir: PathBuf,
    pub taxonomy_path: Option<PathBuf>,
    pub limit: usize,
    pub default_child: String,
    pub rollup: Option<String>,
}

/// Load `{"categories": [{"slug", "title"}]}` into a slug → title map.
/// A missing or malformed file yields no labels.
pub fn load_taxonomy(path: &Path) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "taxonomy not readable; using slugs as labels");
            return labels;
        }
    };
    let data: Value = match serde_json::from_str(&text) {
        Ok(data) => data,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "taxonomy is not valid JSON; using slugs as labels");
            return labels;
        }
    };
    if let Some(categories) = data.get("categories").and_then(Value::as_array) {
        for entry in categories.iter().filter_map(Value::as_object) {
            let slug = coerce(entry.get("slug"));
            let title = coerce(entry.get("title"));
            if !slug.is_empty() && !title.is_empty() {
                labels.insert(slug, title);
            }
        }
    }
    labels
}

fn coerce(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn first_string(item: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| coerce(item.get(*key)))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn looks_like_date_only(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && [&bytes[..4], &bytes[5..7], &bytes[8..]]
            .iter()
            .all(|part| part.iter().all(u8::is_ascii_digit))
}

/// Render a parsed date the way the input spelled it: date-only input
/// stays date-only, a `Z` suffix is kept.
fn format_published(dt: NaiveDateTime, original: &str) -> String {
    if looks_like_date_only(original) {
        return dt.format("%Y-%m-%d").to_string();
    }
    let mut text = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    if original.ends_with('Z') {
        text.push('Z');
    }
    text
}

fn published_at(item: &Map<String, Value>) -> (Option<NaiveDateTime>, String) {
    let mut fallback = String::new();
    for field in POST_DATE_FIELDS {
        let Some(raw) = item.get(*field) else {
            continue;
        };
        if let Some(dt) = parse_datetime(raw) {
            return (Some(dt), format_published(dt, &coerce(Some(raw))));
        }
        if fallback.is_empty() {
            fallback = coerce(Some(raw));
        }
    }
    (None, fallback)
}

/// Scope of a shard as seen by the posts index.
struct Scope {
    parent: String,
    child: String,
    weight: u8,
}

impl Scope {
    fn new(coord: &HotCoord, opts: &PostsOptions) -> Self {
        let child = if coord.child == opts.default_child {
            STANDARD_CHILD.to_string()
        } else {
            coord.child.clone()
        };
        let generic_parent = coord.parent == opts.default_child
            || opts.rollup.as_deref() == Some(coord.parent.as_str());
        let mut weight = 0;
        if !generic_parent {
            weight += 2;
        }
        if child != opts.default_child && child != STANDARD_CHILD {
            weight += 1;
        }
        Self {
            parent: coord.parent.clone(),
            child,
            weight,
        }
    }

    fn labels(&self, taxonomy: &HashMap<String, String>, generic_parent: bool) -> (String, String) {
        let child_key = self.child.rsplit('/').next().unwrap_or_default();
        let mut parent_label = taxonomy
            .get(&self.parent)
            .cloned()
            .unwrap_or_else(|| self.parent.clone());
        let mut child_label = taxonomy
            .get(child_key)
            .cloned()
            .unwrap_or_else(|| child_key.to_string());
        if child_label == parent_label {
            child_label.clear();
        }
        if generic_parent && parent_label == self.parent && !child_label.is_empty() {
            parent_label = std::mem::take(&mut child_label);
        }
        (parent_label, child_label)
    }
}

fn normalize_entry(
    item: &Map<String, Value>,
    scope: &Scope,
    taxonomy: &HashMap<String, String>,
) -> Option<(PostEntry, NaiveDateTime)> {
    let id = first_string(item, ID_FIELDS);
    let title = first_string(item, TITLE_FIELDS);
    let mut url = first_string(item, URL_FIELDS);
    if url.is_empty() {
        url = first_string(item, &["source"]);
    }
    if id.is_empty() || title.is_empty() || url.is_empty() {
        return None;
    }
    let mut source = first_string(item, SOURCE_FIELDS);
    if source.is_empty() {
        source = url.clone();
    }
    let (dt, published) = published_at(item);
    let (category, subcategory) = scope.labels(taxonomy, scope.weight < 2);

    let entry = PostEntry {
        id,
        title,
        url,
        category,
        subcategory,
        source,
        published_at: published,
        excerpt: first_string(item, EXCERPT_FIELDS),
        thumbnail: first_string(item, THUMBNAIL_FIELDS),
    };
    Some((entry, dt.unwrap_or(NaiveDateTime::MIN)))
}

/// Build the posts index from the hot tree.
pub fn build_posts(opts: &PostsOptions) -> Result<Vec<PostEntry>> {
    let taxonomy = match &opts.taxonomy_path {
        Some(path) if path.exists() => load_taxonomy(path),
        _ => HashMap::new(),
    };

    let mut best: Vec<(u8, NaiveDateTime, PostEntry)> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for path in list_shards(&opts.hot_dir)? {
        let parts = relative_parts(&opts.hot_dir, &path);
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let Some(coord) = HotCoord::from_relative(&refs, &opts.default_child) else {
            continue;
        };
        let scope = Scope::new(&coord, opts);
        for item in read_shard(&path).items {
            let Some(obj) = item.as_object() else {
                continue;
            };
            let Some((entry, dt)) = normalize_entry(obj, &scope, &taxonomy) else {
                continue;
            };
            match index_by_id.get(&entry.id) {
                None => {
                    index_by_id.insert(entry.id.clone(), best.len());
                    best.push((scope.weight, dt, entry));
                }
                Some(&idx) => {
                    let (weight, current_dt, _) = &best[idx];
                    if scope.weight > *weight || (scope.weight == *weight && dt > *current_dt) {
                        best[idx] = (scope.weight, dt, entry);
                    }
                }
            }
        }
    }

    best.sort_by(|a, b| (b.1, &b.2.title).cmp(&(a.1, &a.2.title)));
    let mut posts: Vec<PostEntry> = best.into_iter().map(|(_, _, entry)| entry).collect();
    if opts.limit > 0 {
        posts.truncate(opts.limit);
    }
    Ok(posts)
}

/// Build and write the posts index. Returns the number of posts and
/// whether the file changed.
pub fn write_posts(opts: &PostsOptions, output: &Path, store: &ShardStore) -> Result<(usize, bool)> {
    let posts = build_posts(opts)?;
    let changed = store.write_serialized(output, &posts)?;
    Ok((posts.len(), changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardTemplate;
    use serde_json::json;
    use tempfile::TempDir;

    fn options(hot_dir: &Path) -> PostsOptions {
        PostsOptions {
            hot_dir: hot_dir.to_path_buf(),
            taxonomy_path: None,
            limit: 500,
            default_child: "index".to_string(),
            rollup: Some("index".to_string()),
        }
    }

    fn write(hot: &Path, rel: &str, items: Vec<Value>) {
        ShardStore::new(12, false)
            .write_shard(&hot.join(rel), &items, &ShardTemplate::default())
            .unwrap();
    }

    #[test]
    fn test_specific_scope_wins_over_rollup() {
        let tmp = TempDir::new().unwrap();
        let hot = tmp.path();
        let item = json!({"slug": "a", "title": "A", "canonical": "https://x/a", "date": "2024-05-01"});
        write(hot, "index/index.json", vec![item.clone()]);
        write(hot, "tech/ai/index.json", vec![item]);

        let posts = build_posts(&options(hot)).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].category, "tech");
        assert_eq!(posts[0].subcategory, "ai");
        assert_eq!(posts[0].published_at, "2024-05-01");
    }

    #[test]
    fn test_newest_first_and_limit() {
        let tmp = TempDir::new().unwrap();
        let hot = tmp.path();
        write(
            hot,
            "news/index.json",
            vec![
                json!({"slug": "old", "title": "Old", "url": "https://x/o", "date": "2024-04-01"}),
                json!({"slug": "new", "title": "New", "url": "https://x/n", "published_at": "2024-05-02T10:00:00Z"}),
                json!({"slug": "skip", "url": "https://x/s"}),
            ],
        );
        let mut opts = options(hot);
        let posts = build_posts(&opts).unwrap();
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(posts[0].published_at, "2024-05-02T10:00:00Z");
        assert_eq!(posts[0].subcategory, STANDARD_CHILD);
        assert_eq!(posts[0].source, "https://x/n");

        opts.limit = 1;
        assert_eq!(build_posts(&opts).unwrap().len(), 1);
    }

    #[test]
    fn test_taxonomy_labels() {
        let tmp = TempDir::new().unwrap();
        let hot = tmp.path().join("hot");
        let taxonomy = tmp.path().join("taxonomy.json");
        std::fs::write(
            &taxonomy,
            r#"{"categories": [{"slug": "tech", "title": "Technology"}, {"slug": "ai", "title": "AI"}]}"#,
        )
        .unwrap();
        write(
            &hot,
            "tech/ai/index.json",
            vec![json!({"slug": "a", "title": "A", "source": "https://x/a"})],
        );
        let mut opts = options(&hot);
        opts.taxonomy_path = Some(taxonomy);
        let posts = build_posts(&opts).unwrap();
        assert_eq!(posts[0].category, "Technology");
        assert_eq!(posts[0].subcategory, "AI");
        assert_eq!(posts[0].url, "https://x/a");
        assert_eq!(posts[0].published_at, "");
    }

    #[test]
    fn test_format_published() {
        let dt = parse_datetime(&json!("2024-05-02T10:00:00.123+02:00")).unwrap();
        assert_eq!(format_published(dt, "2024-05-02T10:00:00.123+02:00"), "2024-05-02T08:00:00");
        assert!(looks_like_date_only("2024-05-02"));
        assert!(!looks_like_date_only("2024/05/02"));
    }
}
