use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::freshdesk::RetryPolicy;
use crate::pagination::{FetchOptions, DEFAULT_MAX_PAGES};
use crate::rate_limit::RateLimitPolicy;
use crate::sync::SyncPolicy;

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub freshdesk: FreshdeskConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct FreshdeskConfig {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_threshold")]
    pub threshold: u64,
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
    #[serde(default = "default_max_pause_secs")]
    pub max_pause_secs: u64,
    #[serde(default = "default_max_probes")]
    pub max_probes: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            threshold: default_rate_limit_threshold(),
            pause_secs: default_pause_secs(),
            max_pause_secs: default_max_pause_secs(),
            max_probes: default_max_probes(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_secs: default_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub request_delay_ms: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_true")]
    pub assume_conversations_synced_if_ticket_exists: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 0,
            max_pages: default_max_pages(),
            per_page: default_per_page(),
            assume_conversations_synced_if_ticket_exists: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Default)]
pub struct AppConfigOverrides {
    pub freshdesk_domain: Option<String>,
    pub freshdesk_api_key: Option<String>,
    pub store_db_path: Option<String>,
    pub rate_limit_threshold: Option<u64>,
    pub rate_limit_pause_secs: Option<u64>,
    pub rate_limit_max_probes: Option<u32>,
    pub http_timeout_secs: Option<u64>,
    pub sync_request_delay_ms: Option<u64>,
    pub sync_max_pages: Option<u32>,
    pub sync_assume_conversations_synced: Option<bool>,
    pub logging_debug: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {path}")]
    MissingConfigFile { path: PathBuf },
    #[error("failed to resolve config path: HOME is not set and XDG_CONFIG_HOME is unset")]
    MissingHomeDirectory,
    #[error("failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Loads `explicit` if given (it must exist), else the default location if a
/// file is there, else built-in defaults. The result is not validated yet:
/// CLI overrides still apply on top.
pub fn load(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_from(path);
    }

    match resolve_config_path() {
        Ok(path) if path.exists() => load_from(&path),
        Ok(_) | Err(ConfigError::MissingHomeDirectory) => Ok(AppConfig::default()),
        Err(err) => Err(err),
    }
}

pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let path = path.to_path_buf();
    let raw = std::fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::MissingConfigFile { path: path.clone() }
        } else {
            ConfigError::ReadFailed {
                path: path.clone(),
                source,
            }
        }
    })?;

    toml::from_str::<AppConfig>(&raw).map_err(|source| ConfigError::ParseFailed {
        path: path.clone(),
        source,
    })
}

pub fn resolve_config_path() -> Result<PathBuf, ConfigError> {
    let xdg_config_home = std::env::var_os("XDG_CONFIG_HOME");
    let home = std::env::var_os("HOME");
    resolve_config_path_from_env(xdg_config_home, home)
}

fn resolve_config_path_from_env(
    xdg_config_home: Option<OsString>,
    home: Option<OsString>,
) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = xdg_config_home.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir)
            .join("freshdesk-harvest")
            .join("config.toml"));
    }

    let home = home
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingHomeDirectory)?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("freshdesk-harvest")
        .join("config.toml"))
}

impl AppConfig {
    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) -> Result<(), ConfigError> {
        if let Some(value) = &overrides.freshdesk_domain {
            self.freshdesk.domain = value.clone();
        }
        if let Some(value) = &overrides.freshdesk_api_key {
            self.freshdesk.api_key = value.clone();
        }
        if let Some(value) = &overrides.store_db_path {
            self.store.db_path = value.clone();
        }
        if let Some(value) = overrides.rate_limit_threshold {
            self.rate_limit.threshold = value;
        }
        if let Some(value) = overrides.rate_limit_pause_secs {
            self.rate_limit.pause_secs = value;
        }
        if let Some(value) = overrides.rate_limit_max_probes {
            self.rate_limit.max_probes = value;
        }
        if let Some(value) = overrides.http_timeout_secs {
            self.http.timeout_secs = value;
        }
        if let Some(value) = overrides.sync_request_delay_ms {
            self.sync.request_delay_ms = value;
        }
        if let Some(value) = overrides.sync_max_pages {
            self.sync.max_pages = value;
        }
        if let Some(value) = overrides.sync_assume_conversations_synced {
            self.sync.assume_conversations_synced_if_ticket_exists = value;
        }
        if let Some(value) = overrides.logging_debug {
            self.logging.debug = value;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.db_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.db_path must not be empty".into(),
            ));
        }
        if self.rate_limit.pause_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.pause_secs must be > 0".into(),
            ));
        }
        if self.rate_limit.max_pause_secs < self.rate_limit.pause_secs {
            return Err(ConfigError::Invalid(
                "rate_limit.max_pause_secs must be >= rate_limit.pause_secs".into(),
            ));
        }
        if self.rate_limit.max_probes == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_probes must be > 0".into(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Invalid("http.timeout_secs must be > 0".into()));
        }
        if self.sync.max_pages == 0 || self.sync.max_pages > DEFAULT_MAX_PAGES {
            return Err(ConfigError::Invalid(format!(
                "sync.max_pages must be within 1..={DEFAULT_MAX_PAGES}"
            )));
        }
        if self.sync.per_page == 0 || self.sync.per_page > 100 {
            return Err(ConfigError::Invalid(
                "sync.per_page must be within 1..=100".into(),
            ));
        }

        Ok(())
    }

    /// Only the API-facing modes need credentials; export does not.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.freshdesk.domain.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "freshdesk.domain must not be empty".into(),
            ));
        }
        if self.freshdesk.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "freshdesk.api_key must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            threshold: self.rate_limit.threshold,
            pause: Duration::from_secs(self.rate_limit.pause_secs),
            max_pause: Duration::from_secs(self.rate_limit.max_pause_secs),
            max_probes: self.rate_limit.max_probes,
            ..RateLimitPolicy::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.http.max_retries,
            base_backoff: Duration::from_secs(self.http.backoff_secs),
            max_backoff: Duration::from_secs(self.http.max_backoff_secs),
            request_timeout: Duration::from_secs(self.http.timeout_secs),
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            per_page: self.sync.per_page,
            request_delay: Duration::from_millis(self.sync.request_delay_ms),
            max_pages: self.sync.max_pages,
        }
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            assume_conversations_synced_if_ticket_exists: self
                .sync
                .assume_conversations_synced_if_ticket_exists,
        }
    }
}

fn default_db_path() -> String {
    "freshdesk.db".to_string()
}

const fn default_rate_limit_threshold() -> u64 {
    10
}

const fn default_pause_secs() -> u64 {
    60
}

const fn default_max_pause_secs() -> u64 {
    600
}

const fn default_max_probes() -> u32 {
    30
}

const fn default_max_retries() -> usize {
    3
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_backoff_secs() -> u64 {
    1
}

const fn default_max_backoff_secs() -> u64 {
    30
}

const fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

const fn default_per_page() -> u32 {
    100
}

const fn default_true() -> bool {
    true
}
