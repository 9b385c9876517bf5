// ── Core error types ──
//
// Pipeline-level errors from devwatch-core. Consumers see these, never raw
// HTTP or STOMP failures; the `From<devwatch_api::Error>` impl translates
// transport-layer errors into the variant that matches where they occur.
//
// Most of these are contained: the pipeline logs them and carries on.
// Only `BackendRequest` (push-send rejected) ends a `track` call.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to update broker after {attempts} attempt(s): {reason}")]
    TransportConnect { attempts: u32, reason: String },

    #[error("No live broker connection to subscribe on")]
    SubscriptionUnavailable,

    // ── Payload errors ───────────────────────────────────────────────
    #[error("Malformed update message: {message}")]
    MessageParse { message: String },

    #[error("Cannot decode compressed payload: {message}")]
    Decode { message: String },

    // ── Backend errors ───────────────────────────────────────────────
    #[error("Status poll failed: {message}")]
    PollTransport { message: String },

    #[error("{message}")]
    BackendRequest {
        message: String,
        /// HTTP status code, when the backend answered at all.
        status: Option<u16>,
    },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::MessageParse {
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Wrap a failed status or device-list fetch.
    pub(crate) fn poll(err: &devwatch_api::Error) -> Self {
        Self::PollTransport {
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<devwatch_api::Error> for CoreError {
    fn from(err: devwatch_api::Error) -> Self {
        match err {
            devwatch_api::Error::Backend { status, message } => CoreError::BackendRequest {
                message,
                status: Some(status),
            },
            devwatch_api::Error::Transport(ref e) => CoreError::BackendRequest {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            devwatch_api::Error::Timeout { timeout_secs } => CoreError::BackendRequest {
                message: format!("Request timed out after {timeout_secs}s"),
                status: None,
            },
            devwatch_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            devwatch_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            devwatch_api::Error::WebSocketConnect(reason) => CoreError::TransportConnect {
                attempts: 1,
                reason,
            },
            devwatch_api::Error::WebSocketClosed { code, reason } => CoreError::TransportConnect {
                attempts: 1,
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            devwatch_api::Error::NotConnected => CoreError::SubscriptionUnavailable,
            devwatch_api::Error::Protocol(message) => CoreError::MessageParse { message },
            devwatch_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_rejection_keeps_message_verbatim() {
        let err = CoreError::from(devwatch_api::Error::Backend {
            status: 400,
            message: "Unknown MSISDN".into(),
        });
        assert_eq!(err.to_string(), "Unknown MSISDN");
        assert!(matches!(
            err,
            CoreError::BackendRequest {
                status: Some(400),
                ..
            }
        ));
    }

    #[test]
    fn not_connected_maps_to_subscription_unavailable() {
        let err = CoreError::from(devwatch_api::Error::NotConnected);
        assert!(matches!(err, CoreError::SubscriptionUnavailable));
    }
}
