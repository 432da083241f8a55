//! Configuration parsing and validation.
//!
//! Settings come from a TOML file (all sections optional), then
//! environment overrides, then CLI flags. Validation runs once the layers
//! are merged so that a bad value from any source fails fast.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use feedshard_core::router::{slugify_segment, Router};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/feedshard.toml";

pub const ENV_RETENTION_DAYS: &str = "HOT_RETENTION_DAYS";
pub const ENV_PAGINATION_SIZE: &str = "HOT_PAGINATION_SIZE";
pub const ENV_MAX_ITEMS: &str = "HOT_MAX_ITEMS";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub hot: HotConfig,
    #[serde(default)]
    pub posts: PostsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_hot_dir")]
    pub hot_dir: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_posts_path")]
    pub posts_path: PathBuf,
    #[serde(default)]
    pub taxonomy_path: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            hot_dir: default_hot_dir(),
            archive_dir: default_archive_dir(),
            posts_path: default_posts_path(),
            taxonomy_path: None,
        }
    }
}

fn default_hot_dir() -> PathBuf {
    PathBuf::from("data/hot")
}
fn default_archive_dir() -> PathBuf {
    PathBuf::from("data/archive")
}
fn default_posts_path() -> PathBuf {
    PathBuf::from("data/posts.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RotationConfig {
    /// Signed so that a negative value can be reported instead of wrapping.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            per_page: default_per_page(),
        }
    }
}

fn default_retention_days() -> i64 {
    30
}
fn default_per_page() -> usize {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct HotConfig {
    /// Capacity of a hot shard; `0` disables the cap.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_parent")]
    pub default_parent: String,
    #[serde(default = "default_child")]
    pub default_child: String,
    #[serde(default)]
    pub rollup: Option<String>,
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            default_parent: default_parent(),
            default_child: default_child(),
            rollup: None,
        }
    }
}

fn default_max_items() -> usize {
    240
}
fn default_parent() -> String {
    "general".to_string()
}
fn default_child() -> String {
    "index".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PostsConfig {
    #[serde(default = "default_posts_limit")]
    pub limit: usize,
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            limit: default_posts_limit(),
        }
    }
}

fn default_posts_limit() -> usize {
    500
}

impl Config {
    /// Apply `HOT_*` environment overrides through `lookup`.
    ///
    /// Taking a lookup function keeps this testable without touching the
    /// process environment. Unparseable values are errors, never ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = non_blank(lookup(ENV_RETENTION_DAYS)) {
            self.rotation.retention_days = raw
                .parse()
                .with_context(|| format!("{} must be an integer, got '{}'", ENV_RETENTION_DAYS, raw))?;
        }
        if let Some(raw) = non_blank(lookup(ENV_PAGINATION_SIZE)) {
            self.rotation.per_page = raw.parse().with_context(|| {
                format!("{} must be a positive integer, got '{}'", ENV_PAGINATION_SIZE, raw)
            })?;
        }
        if let Some(raw) = non_blank(lookup(ENV_MAX_ITEMS)) {
            self.hot.max_items = raw.parse().with_context(|| {
                format!("{} must be a non-negative integer, got '{}'", ENV_MAX_ITEMS, raw)
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.rotation.retention_days < 0 {
            bail!(
                "rotation.retention_days must be >= 0 (got {})",
                self.rotation.retention_days
            );
        }
        if self.rotation.per_page == 0 {
            bail!("rotation.per_page must be > 0");
        }
        if self.posts.limit == 0 {
            bail!("posts.limit must be > 0");
        }
        check_slug("hot.default_parent", &self.hot.default_parent)?;
        check_slug("hot.default_child", &self.hot.default_child)?;
        if let Some(rollup) = &self.hot.rollup {
            check_slug("hot.rollup", rollup)?;
        }
        Ok(())
    }

    /// Router built from the `[hot]` section.
    pub fn router(&self) -> Result<Router> {
        Router::new(
            &self.hot.default_parent,
            &self.hot.default_child,
            self.hot.rollup.as_deref(),
        )
    }

    /// Normalized default child marker.
    pub fn default_child(&self) -> String {
        slugify_segment(&self.hot.default_child)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_slug(field: &str, value: &str) -> Result<()> {
    if slugify_segment(value).is_empty() {
        bail!("{} must contain at least one letter or digit (got '{}')", field, value);
    }
    Ok(())
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config.validate()?;
    Ok(config)
}

/// Resolve the effective config: the explicit path must exist, the
/// default path is optional, and built-in defaults fill the gap.
/// Environment overrides are applied on top.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.is_file() {
                load_config(default)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rotation.retention_days, 30);
        assert_eq!(config.rotation.per_page, 12);
        assert_eq!(config.hot.max_items, 240);
        assert_eq!(config.hot.default_parent, "general");
        assert_eq!(config.hot.default_child, "index");
        assert_eq!(config.posts.limit, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("feedshard.toml");
        std::fs::write(
            &path,
            "[rotation]\nretention_days = 7\n\n[hot]\nrollup = \"index\"\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.rotation.retention_days, 7);
        assert_eq!(config.rotation.per_page, 12);
        assert_eq!(config.hot.rollup.as_deref(), Some("index"));
        assert_eq!(config.paths.hot_dir, PathBuf::from("data/hot"));
    }

    #[test]
    fn test_invalid_file_values_fail() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[rotation]\nretention_days = -1\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("retention_days"));

        std::fs::write(&path, "[rotation]\nper_page = 0\n").unwrap();
        assert!(load_config(&path).is_err());

        std::fs::write(&path, "[hot]\ndefault_parent = \"!!\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(resolve_config(Some(&tmp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                (ENV_RETENTION_DAYS, "14"),
                (ENV_PAGINATION_SIZE, " 20 "),
                (ENV_MAX_ITEMS, ""),
            ]))
            .unwrap();
        assert_eq!(config.rotation.retention_days, 14);
        assert_eq!(config.rotation.per_page, 20);
        assert_eq!(config.hot.max_items, 240);
    }

    #[test]
    fn test_invalid_env_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[(ENV_RETENTION_DAYS, "thirty")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_RETENTION_DAYS));

        let mut config = Config::default();
        assert!(config.apply_env(env(&[(ENV_MAX_ITEMS, "-5")])).is_err());
    }

    #[test]
    fn test_router_from_config() {
        let mut config = Config::default();
        config.hot.default_parent = "World News".to_string();
        let router = config.router().unwrap();
        assert_eq!(router.default_parent(), "world-news");
        assert_eq!(router.rollup(), None);
    }
}
