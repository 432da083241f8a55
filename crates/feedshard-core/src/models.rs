//! Post records as produced by feed pullers and stored in hot shards.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::dates::{item_date, DATE_FIELDS};

/// A normalized post record.
///
/// `category_slug`, `category` and `subcategory` are routing inputs only;
/// they are never written into a shard entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub slug: String,
    pub title: Option<String>,
    /// ISO `YYYY-MM-DD`.
    pub date: String,
    pub cover: Option<String>,
    pub canonical: Option<String>,
    pub excerpt: Option<String>,
    pub source: Option<String>,
    pub category_slug: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl PostRecord {
    /// Normalize a raw puller record.
    ///
    /// Returns `None` when `raw` is not an object or carries no usable
    /// `slug`. A missing or unparseable date falls back to `run_date`.
    pub fn normalize(raw: &Value, run_date: NaiveDate) -> Option<Self> {
        let obj = raw.as_object()?;
        let slug = text(obj, "slug")?;

        let date = if DATE_FIELDS.iter().any(|f| obj.contains_key(*f)) {
            item_date(raw).unwrap_or(run_date)
        } else {
            run_date
        };

        let category = text(obj, "category");
        let subcategory = text(obj, "subcategory");
        let category_slug = text(obj, "category_slug")
            .map(|s| s.trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| match (&category, &subcategory) {
                (Some(cat), Some(sub)) => Some(format!("{}/{}", cat, sub)),
                (Some(cat), None) => Some(cat.clone()),
                _ => None,
            });

        Some(Self {
            slug,
            title: text(obj, "title"),
            date: date.format("%Y-%m-%d").to_string(),
            cover: text(obj, "cover"),
            canonical: text(obj, "canonical"),
            excerpt: text(obj, "excerpt"),
            source: text(obj, "source"),
            category_slug,
            category,
            subcategory,
        })
    }

    /// Render the stored hot entry. Absent fields are omitted.
    pub fn to_value(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("slug".into(), Value::String(self.slug.clone()));
        put(&mut entry, "title", &self.title);
        entry.insert("date".into(), Value::String(self.date.clone()));
        put(&mut entry, "cover", &self.cover);
        put(&mut entry, "canonical", &self.canonical);
        put(&mut entry, "excerpt", &self.excerpt);
        put(&mut entry, "source", &self.source);
        Value::Object(entry)
    }
}

fn put(entry: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        entry.insert(key.to_string(), Value::String(value.clone()));
    }
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    #[test]
    fn test_normalize_trims_and_orders_fields() {
        let raw = json!({
            "source": "https://example.com/a",
            "title": "  Hello  ",
            "slug": " hello ",
            "date": "2024-05-08T10:00:00Z",
            "body": "<p>dropped</p>",
        });
        let post = PostRecord::normalize(&raw, run_date()).unwrap();
        assert_eq!(post.slug, "hello");
        assert_eq!(post.title.as_deref(), Some("Hello"));
        assert_eq!(post.date, "2024-05-08");

        let stored = post.to_value();
        let keys: Vec<&String> = stored.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["slug", "title", "date", "source"]);
    }

    #[test]
    fn test_normalize_rejects_missing_slug() {
        assert!(PostRecord::normalize(&json!({"title": "x"}), run_date()).is_none());
        assert!(PostRecord::normalize(&json!({"slug": "   "}), run_date()).is_none());
        assert!(PostRecord::normalize(&json!({"slug": 12}), run_date()).is_none());
        assert!(PostRecord::normalize(&json!(["slug"]), run_date()).is_none());
    }

    #[test]
    fn test_bad_or_missing_date_uses_run_date() {
        let post = PostRecord::normalize(&json!({"slug": "a", "date": "soon"}), run_date()).unwrap();
        assert_eq!(post.date, "2024-05-10");
        let post = PostRecord::normalize(&json!({"slug": "b"}), run_date()).unwrap();
        assert_eq!(post.date, "2024-05-10");
    }

    #[test]
    fn test_date_from_alternate_field() {
        let raw = json!({"slug": "a", "published": "Wed, 08 May 2024 09:00:00 GMT"});
        let post = PostRecord::normalize(&raw, run_date()).unwrap();
        assert_eq!(post.date, "2024-05-08");
    }

    #[test]
    fn test_category_slug_sources() {
        let raw = json!({"slug": "a", "category_slug": "/tech/ai/"});
        let post = PostRecord::normalize(&raw, run_date()).unwrap();
        assert_eq!(post.category_slug.as_deref(), Some("tech/ai"));

        let raw = json!({"slug": "a", "category": "Tech", "subcategory": "AI"});
        let post = PostRecord::normalize(&raw, run_date()).unwrap();
        assert_eq!(post.category_slug.as_deref(), Some("Tech/AI"));

        let raw = json!({"slug": "a", "subcategory": "AI"});
        let post = PostRecord::normalize(&raw, run_date()).unwrap();
        assert_eq!(post.category_slug, None);
    }
}
