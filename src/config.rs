//! Run configuration from the environment (and `.env`, loaded by the binary).

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::{DEFAULT_BASE_URL, RetryPolicy};

pub const DEFAULT_WAREHOUSE_URL: &str = "sqlite://warehouse.db?mode=rwc";

/// Maps line names to canonical line ids, for records that arrive without an id.
///
/// Stored as a plain JSON object on disk:
/// ```json
/// {
///   "Central": "central",
///   "Hammersmith & City": "hammersmith-city"
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LineNameMap {
    entries: HashMap<String, String>,
}

impl LineNameMap {
    /// Loads the map from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading line name map {}", path.display()))?;
        let entries: HashMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("parsing line name map {}", path.display()))?;
        Ok(Self { entries })
    }

    /// Iterates over all `(name, line_id)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for LineNameMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub app_id: String,
    pub app_key: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Option<Credentials>,
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub warehouse_url: String,
    pub line_names_path: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub s3_bucket: Option<String>,
    pub s3_prefix: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary variable source. Blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str, default: u64| -> Result<u64> {
            match var(key) {
                None => Ok(default),
                Some(v) => v
                    .parse()
                    .with_context(|| format!("{key} must be a non-negative integer, got {v:?}")),
            }
        };

        let credentials = match (var("TFL_APP_ID"), var("TFL_APP_KEY")) {
            (Some(app_id), Some(app_key)) => Some(Credentials { app_id, app_key }),
            (None, None) => None,
            _ => bail!("TFL_APP_ID and TFL_APP_KEY must be set together"),
        };

        let retries = u32::try_from(number("TFL_MAX_RETRIES", 3)?).context("TFL_MAX_RETRIES is too large")?;
        let retry = RetryPolicy::with_retries(
            retries,
            Duration::from_millis(number("TFL_BACKOFF_MS", 500)?),
        );

        Ok(Self {
            credentials,
            base_url: var("TFL_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(number("TFL_TIMEOUT_SECS", 10)?),
            retry,
            warehouse_url: var("WAREHOUSE_URL")
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| DEFAULT_WAREHOUSE_URL.to_string()),
            line_names_path: var("TFL_LINE_NAMES").map(PathBuf::from),
            archive_dir: var("TFL_ARCHIVE_DIR").map(PathBuf::from),
            s3_bucket: var("TFL_S3_BUCKET"),
            s3_prefix: var("TFL_S3_PREFIX").unwrap_or_default(),
        })
    }

    /// Credentials are only needed by commands that call the API.
    pub fn require_credentials(&self) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .context("Missing TfL credentials (TFL_APP_ID/TFL_APP_KEY)")
    }

    pub fn line_names(&self) -> Result<LineNameMap> {
        match &self.line_names_path {
            Some(path) => LineNameMap::load(path),
            None => Ok(LineNameMap::default()),
        }
    }
}
