//! Flag-aware configuration resolution.
//!
//! Profile loading lives in `devwatch-config`; this module layers the
//! global CLI flags on top and builds the clients commands need.

use std::time::Duration;

use url::Url;

use devwatch_api::{BackendClient, TransportConfig};
use devwatch_config::{Config, Profile, profile_to_tracker_config};
use devwatch_core::TrackerConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use devwatch_config::{config_path, load_config, load_config_or_default, save_config};

/// Backend used when neither a profile nor `--backend` names one.
const FALLBACK_BACKEND: &str = "http://localhost:8080";

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.active_profile_name(global.profile.as_deref())
}

/// Pick the profile to run with.
///
/// An explicitly requested profile must exist. Without one, a missing
/// default profile falls back to a local backend.
fn select_profile(global: &GlobalOpts, config: &Config) -> Result<Profile, CliError> {
    let name = active_profile_name(global, config);
    if let Some(profile) = config.profiles.get(&name) {
        return Ok(profile.clone());
    }
    if global.profile.is_some() {
        let available = config.profiles.keys().cloned().collect::<Vec<_>>().join(", ");
        return Err(CliError::ProfileNotFound {
            name,
            available: if available.is_empty() {
                "(none)".into()
            } else {
                available
            },
        });
    }
    Ok(Profile::new(FALLBACK_BACKEND))
}

/// Translate config + global flags into a `TrackerConfig`.
///
/// Flags win over the profile; the profile wins over built-in defaults.
pub fn resolve_tracker_config(global: &GlobalOpts) -> Result<TrackerConfig, CliError> {
    let cfg = load_config()?;
    let mut profile = select_profile(global, &cfg)?;

    if let Some(ref backend) = global.backend {
        backend.clone_into(&mut profile.backend);
        // A new backend invalidates a profile-pinned broker URL.
        profile.websocket = None;
    }
    if let Some(ref websocket) = global.websocket {
        profile.websocket = Some(websocket.clone());
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    let config = profile_to_tracker_config(&profile, &cfg.defaults)?;
    tracing::debug!(
        backend = %config.backend_url,
        websocket = %config.websocket_url,
        "resolved tracker config"
    );
    Ok(config)
}

/// Build a one-shot backend client for the status, devices and end commands.
pub fn build_backend(config: &TrackerConfig) -> Result<BackendClient, CliError> {
    let transport = TransportConfig {
        timeout: config.timeout,
        user_agent: config.user_agent.clone(),
        ..TransportConfig::default()
    };
    Ok(BackendClient::new(config.backend_url.clone(), &transport)?)
}

/// Apply a `--poll-interval` override.
pub fn with_poll_interval(
    mut config: TrackerConfig,
    secs: Option<u64>,
) -> Result<TrackerConfig, CliError> {
    if let Some(secs) = secs {
        if secs == 0 {
            return Err(CliError::Validation {
                field: "poll-interval".into(),
                reason: "must be at least 1 second".into(),
            });
        }
        config.poll_interval = Duration::from_secs(secs);
    }
    Ok(config)
}

/// Parse a URL typed at a prompt or flag.
pub fn parse_url(field: &str, raw: &str) -> Result<Url, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}
