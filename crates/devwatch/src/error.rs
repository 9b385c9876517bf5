//! CLI error types with miette diagnostics.
//!
//! Maps core, config and transport errors into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use devwatch_config::ConfigError;
use devwatch_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach {endpoint}")]
    #[diagnostic(
        code(devwatch::connection_failed),
        help(
            "Check that the backend is running and reachable.\n\
             Reason: {reason}\n\
             Override the URL with --backend or --websocket."
        )
    )]
    ConnectionFailed { endpoint: String, reason: String },

    // ── Backend ──────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(devwatch::backend))]
    Backend {
        message: String,
        status: Option<u16>,
    },

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(devwatch::not_found),
        help("Run: devwatch {list_command} to see what the backend knows")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Tracking ─────────────────────────────────────────────────────
    #[error("Tracking failed: {message}")]
    #[diagnostic(code(devwatch::track_failed))]
    TrackFailed { message: String },

    #[error("No device update within {waited}")]
    #[diagnostic(
        code(devwatch::no_update),
        help("The device may be offline. Retry later or raise --wait.")
    )]
    NoUpdate { waited: String },

    #[error("Update pipeline error: {message}")]
    #[diagnostic(code(devwatch::pipeline))]
    Pipeline { message: String },

    #[error("Interrupted")]
    #[diagnostic(code(devwatch::interrupted))]
    Interrupted,

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(devwatch::timeout),
        help("Increase timeout with --timeout or check backend responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(devwatch::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(devwatch::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: devwatch config init --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(devwatch::config))]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::NotFound { .. }
            | Self::ProfileNotFound { .. }
            | Self::Backend {
                status: Some(404), ..
            } => exit_code::NOT_FOUND,
            Self::Timeout { .. } | Self::NoUpdate { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Interrupted => exit_code::INTERRUPTED,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TransportConnect { attempts, reason } => CliError::ConnectionFailed {
                endpoint: "update broker".into(),
                reason: format!("gave up after {attempts} attempt(s): {reason}"),
            },

            CoreError::SubscriptionUnavailable => CliError::ConnectionFailed {
                endpoint: "update broker".into(),
                reason: "no live subscription".into(),
            },

            CoreError::BackendRequest { message, status } => CliError::Backend { message, status },

            CoreError::PollTransport { message } => CliError::Backend {
                message,
                status: None,
            },

            CoreError::Validation { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Cancelled => CliError::Interrupted,

            CoreError::MessageParse { message }
            | CoreError::Decode { message }
            | CoreError::Internal(message) => CliError::Pipeline { message },
        }
    }
}

// ── Transport errors from one-shot HTTP commands ─────────────────────

impl From<devwatch_api::Error> for CliError {
    fn from(err: devwatch_api::Error) -> Self {
        match err {
            devwatch_api::Error::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            devwatch_api::Error::Transport(ref e) if e.is_connect() => CliError::ConnectionFailed {
                endpoint: e
                    .url()
                    .map_or_else(|| "push backend".into(), ToString::to_string),
                reason: err.to_string(),
            },
            other => CoreError::from(other).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_not_found_maps_to_exit_code() {
        let err = CliError::from(devwatch_api::Error::Backend {
            status: 404,
            message: "Session not found".into(),
        });
        assert_eq!(err.to_string(), "Session not found");
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
    }

    #[test]
    fn retry_exhaustion_is_a_connection_error() {
        let err = CliError::from(CoreError::TransportConnect {
            attempts: 3,
            reason: "refused".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn config_validation_is_usage_error() {
        let err = CliError::from(ConfigError::Validation {
            field: "backend".into(),
            reason: "invalid URL".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
