//! Configuration management for councildocs.
//!
//! A [`Config`] is the on-disk shape (every field optional). It is applied on
//! top of [`Settings::default`] once at startup, and the resulting [`Settings`]
//! value is passed by reference into every component. Nothing reads global
//! state after that point.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILENAME: &str = "councildocs.toml";

/// Environment variable overriding the search page URL.
pub const ENV_START_URL: &str = "COUNCILDOCS_START_URL";
/// Environment variable overriding the portal base URL.
pub const ENV_BASE_URL: &str = "COUNCILDOCS_BASE_URL";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid setting `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

/// How the document type filter is compared against a record's label.
///
/// Both modes ignore case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Label contains the filter string.
    #[default]
    Substring,
    /// Label equals the filter string.
    Exact,
}

/// Maps one entry of the embedded page model onto a `DocumentRecord`.
///
/// Portals built on the same product share field names, but they are not
/// guaranteed, so every name is configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    /// JavaScript variable holding the model (`var model = {...};`).
    pub model_variable: String,
    /// Dot-separated path to the entry array inside the model.
    pub rows_path: String,
    pub id_field: String,
    pub title_field: String,
    pub description_field: String,
    pub type_field: String,
    pub filename_field: String,
    /// Field holding a ready-made download URL, if the portal provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url_field: Option<String>,
    /// Template used when no URL field is present; `{Field}` placeholders are
    /// replaced with entry values and the result is resolved against the base URL.
    pub download_url_template: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            model_variable: "model".to_string(),
            rows_path: "Rows".to_string(),
            id_field: "Guid".to_string(),
            title_field: "Doc_Ref2".to_string(),
            description_field: "Doc_Desc".to_string(),
            type_field: "Doc_Type".to_string(),
            filename_field: "Doc_Ref2".to_string(),
            download_url_field: None,
            download_url_template: "Document/ViewDocument?id={Guid}".to_string(),
        }
    }
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Used for logging and display only.
    pub council_name: String,
    /// Portal root; relative download URLs resolve against it.
    pub base_url: String,
    /// Search-results page to extract documents from.
    pub start_url: String,
    pub download_dir: PathBuf,
    /// Courtesy delay between requests to the portal.
    pub request_delay: Duration,
    /// Worker pool size in parallel mode.
    pub max_workers: usize,
    pub document_type_filter: String,
    pub filter_mode: FilterMode,
    pub use_cache: bool,
    pub cache_file: PathBuf,
    pub cache_expiry: Duration,
    pub connection_timeout: Duration,
    /// Attempts per request and per download task.
    pub retry_attempts: u32,
    /// First backoff delay; doubles on every retry.
    pub retry_base_delay: Duration,
    /// Cap on documents processed per run (0 = all).
    pub batch_size: usize,
    /// User agent setting (`None` = default browser agent, `"impersonate"` = random).
    pub user_agent: Option<String>,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Plain-text log file (in addition to stderr).
    pub log_file: Option<PathBuf>,
    /// Content type expected for document bodies; mismatches are logged.
    pub expected_content_type: String,
    /// Extension appended to filenames that lack it.
    pub default_extension: String,
    /// Overwrite files that already exist instead of skipping them.
    pub overwrite: bool,
    pub mapping: FieldMapping,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            council_name: "YourCouncil".to_string(),
            base_url: "https://publicaccess.yourcouncil.gov.uk/PublicAccess_LIVE/".to_string(),
            start_url: "https://publicaccess.yourcouncil.gov.uk/PublicAccess_LIVE/SearchResult/RunThirdPartySearch?FileSystemid=PL&FOLDER1_REF=123456".to_string(),
            download_dir: PathBuf::from("downloaded-pdfs"),
            request_delay: Duration::from_millis(500),
            max_workers: 20,
            document_type_filter: "Planning Comments".to_string(),
            filter_mode: FilterMode::default(),
            use_cache: true,
            cache_file: PathBuf::from("document_cache.json"),
            cache_expiry: Duration::from_secs(3600),
            connection_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            batch_size: 100,
            user_agent: None,
            headers: BTreeMap::new(),
            log_file: Some(PathBuf::from("download_log.txt")),
            expected_content_type: "application/pdf".to_string(),
            default_extension: "pdf".to_string(),
            overwrite: false,
            mapping: FieldMapping::default(),
        }
    }
}

impl Settings {
    /// Check values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.start_url).map_err(|e| ConfigError::Invalid {
            key: "start_url",
            message: e.to_string(),
        })?;
        url::Url::parse(&self.base_url).map_err(|e| ConfigError::Invalid {
            key: "base_url",
            message: e.to_string(),
        })?;
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "max_workers",
                message: "must be at least 1".to_string(),
            });
        }
        if self.mapping.id_field.is_empty() {
            return Err(ConfigError::Invalid {
                key: "mapping.id_field",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub council_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,
    /// Delay between requests in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_mode: Option<FilterMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_expiry_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Log file path; an empty string disables file logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<FieldMapping>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load the config named on the command line, or `councildocs.toml` in
    /// the working directory, or nothing.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILENAME);
        if default_path.is_file() {
            Self::load_from_path(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    /// Supports TOML, YAML and JSON based on file extension.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut config: Config = match ext {
            "json" => serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?
            }
            _ => toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent())
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are joined onto `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply this file's values on top of `settings`.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        let base_dir = self.base_dir();

        if let Some(ref name) = self.council_name {
            settings.council_name = name.clone();
        }
        if let Some(ref url) = self.base_url {
            settings.base_url = url.clone();
        }
        if let Some(ref url) = self.start_url {
            settings.start_url = url.clone();
        }
        if let Some(ref dir) = self.download_dir {
            settings.download_dir = self.resolve_path(dir, &base_dir);
        }
        if let Some(ms) = self.request_delay_ms {
            settings.request_delay = Duration::from_millis(ms);
        }
        if let Some(workers) = self.max_workers {
            settings.max_workers = workers;
        }
        if let Some(ref filter) = self.document_type_filter {
            settings.document_type_filter = filter.clone();
        }
        if let Some(mode) = self.filter_mode {
            settings.filter_mode = mode;
        }
        if let Some(use_cache) = self.use_cache {
            settings.use_cache = use_cache;
        }
        if let Some(ref file) = self.cache_file {
            settings.cache_file = self.resolve_path(file, &base_dir);
        }
        if let Some(secs) = self.cache_expiry_secs {
            settings.cache_expiry = Duration::from_secs(secs);
        }
        if let Some(secs) = self.connection_timeout_secs {
            settings.connection_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.retry_attempts {
            settings.retry_attempts = attempts;
        }
        if let Some(ms) = self.retry_base_delay_ms {
            settings.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(batch) = self.batch_size {
            settings.batch_size = batch;
        }
        if let Some(ref ua) = self.user_agent {
            settings.user_agent = Some(ua.clone());
        }
        for (name, value) in &self.headers {
            settings.headers.insert(name.clone(), value.clone());
        }
        if let Some(ref log_file) = self.log_file {
            settings.log_file = if log_file.is_empty() {
                None
            } else {
                Some(self.resolve_path(log_file, &base_dir))
            };
        }
        if let Some(ref content_type) = self.expected_content_type {
            settings.expected_content_type = content_type.clone();
        }
        if let Some(ref ext) = self.default_extension {
            settings.default_extension = ext.trim_start_matches('.').to_string();
        }
        if let Some(ref mapping) = self.mapping {
            settings.mapping = mapping.clone();
        }
    }

    /// Build settings from defaults, this file and the environment.
    pub fn into_settings(self) -> Settings {
        let mut settings = Settings::default();
        self.apply_to_settings(&mut settings);
        apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
        settings
    }
}

/// Apply environment overrides using the given lookup.
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_START_URL).filter(|v| !v.is_empty()) {
        settings.start_url = url;
    }
    if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
        settings.base_url = url;
    }
}
