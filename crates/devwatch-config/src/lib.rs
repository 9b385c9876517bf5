//! Configuration for the devwatch CLI.
//!
//! TOML profiles merged with `DEVWATCH_`-prefixed environment variables,
//! and translation to `devwatch_core::TrackerConfig`. The core crate never
//! reads files; the CLI adds flag-aware overrides on top of this.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use devwatch_core::{DEFAULT_TOPIC, RetryPolicy, TrackerConfig, derive_websocket_url};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "DEVWATCH_CONFIG";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use: the override, else `default_profile`,
    /// else `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound { name: name.into() })
    }
}

/// Global defaults shared by every profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named backend profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Push backend base URL (e.g., "http://localhost:8080").
    pub backend: String,

    /// Broker endpoint. Derived from `backend` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket: Option<String>,

    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// `0` disables the connection health check.
    #[serde(default = "default_health_check")]
    pub health_check_secs: u64,

    #[serde(default = "default_retry_initial")]
    pub retry_initial_ms: u64,

    #[serde(default = "default_retry_max")]
    pub retry_max_ms: u64,

    /// `0` retries forever.
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,

    /// Override the global timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Profile {
    /// A profile pointing at `backend` with every other field defaulted.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            websocket: None,
            topic: default_topic(),
            agent_id: default_agent_id(),
            user_agent: None,
            poll_interval_secs: default_poll_interval(),
            health_check_secs: default_health_check(),
            retry_initial_ms: default_retry_initial(),
            retry_max_ms: default_retry_max(),
            retry_max_attempts: default_retry_attempts(),
            timeout: None,
        }
    }
}

fn default_topic() -> String {
    DEFAULT_TOPIC.into()
}
fn default_agent_id() -> String {
    "devwatch".into()
}
fn default_poll_interval() -> u64 {
    2
}
fn default_health_check() -> u64 {
    30
}
fn default_retry_initial() -> u64 {
    2000
}
fn default_retry_max() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    10
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `$DEVWATCH_CONFIG`, else the platform
/// config directory.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("com", "devwatch", "devwatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("devwatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path` + environment. A missing file yields defaults.
///
/// Nested keys use a double underscore: `DEVWATCH_DEFAULTS__TIMEOUT=5`,
/// `DEVWATCH_PROFILES__LAB__BACKEND=http://lab:8080`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DEVWATCH_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile → TrackerConfig ─────────────────────────────────────────

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

/// Build a `TrackerConfig` from a profile. No CLI flag overrides.
pub fn profile_to_tracker_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<TrackerConfig, ConfigError> {
    let backend_url = parse_url("backend", &profile.backend)?;
    if !matches!(backend_url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "backend".into(),
            reason: format!("expected an http(s) URL, got '{}'", profile.backend),
        });
    }

    let websocket_url = match profile.websocket.as_deref() {
        Some(raw) => {
            let url = parse_url("websocket", raw)?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(ConfigError::Validation {
                    field: "websocket".into(),
                    reason: format!("expected a ws(s) URL, got '{raw}'"),
                });
            }
            url
        }
        None => derive_websocket_url(&backend_url).map_err(|e| ConfigError::Validation {
            field: "websocket".into(),
            reason: e.to_string(),
        })?,
    };

    if profile.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            field: "poll_interval_secs".into(),
            reason: "must be at least 1".into(),
        });
    }
    if profile.retry_max_ms < profile.retry_initial_ms {
        return Err(ConfigError::Validation {
            field: "retry_max_ms".into(),
            reason: format!(
                "{} is below retry_initial_ms ({})",
                profile.retry_max_ms, profile.retry_initial_ms
            ),
        });
    }

    let fallback = TrackerConfig::default();
    Ok(TrackerConfig {
        backend_url,
        websocket_url,
        topic: profile.topic.clone(),
        agent_id: profile.agent_id.clone(),
        user_agent: profile.user_agent.clone().unwrap_or(fallback.user_agent),
        poll_interval: Duration::from_secs(profile.poll_interval_secs),
        health_check_interval: Duration::from_secs(profile.health_check_secs),
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        retry: RetryPolicy {
            initial_delay: Duration::from_millis(profile.retry_initial_ms),
            max_delay: Duration::from_millis(profile.retry_max_ms),
            max_attempts: (profile.retry_max_attempts > 0).then_some(profile.retry_max_attempts),
        },
    })
}
