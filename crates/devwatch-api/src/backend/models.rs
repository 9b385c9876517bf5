// Wire types for the push backend's HTTP API.
//
// Field names follow the backend's camelCase JSON. Unknown fields are
// tolerated everywhere; the backend adds diagnostics freely.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/push/send`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub agent_id: String,
    pub msisdn: String,
    pub user_agent: String,
}

/// Successful response of `POST /api/push/send`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAccepted {
    pub session_id: String,
}

/// Response of `GET /api/push/status/{sessionId}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub status: String,
    #[serde(default)]
    pub has_device_response: bool,
    #[serde(default)]
    pub fcm_status: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Coarse interpretation of a [`SessionStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// The device answered and its record is ready to fetch.
    Responded,
    /// The backend gave up on this session.
    Failed { message: String },
    /// Anything else: still in flight.
    Pending { status: String, detail: String },
}

impl SessionStatus {
    pub fn phase(&self) -> SessionPhase {
        match self.status.as_str() {
            "responded" if self.has_device_response => SessionPhase::Responded,
            "failed" => SessionPhase::Failed {
                message: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".into()),
            },
            other => SessionPhase::Pending {
                status: other.to_owned(),
                detail: self
                    .fcm_status
                    .clone()
                    .unwrap_or_else(|| "Processing".into()),
            },
        }
    }
}

/// One entry of `GET /api/debug/devices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    #[serde(default)]
    pub device_id: Option<String>,
    pub phone_number: String,
    /// Backend timestamp; ISO-8601 string or epoch millis depending on store.
    #[serde(default)]
    pub last_updated: Option<serde_json::Value>,
    #[serde(default)]
    pub device_details: serde_json::Value,
    #[serde(default)]
    pub latest_telemetry: serde_json::Value,
}

/// Body of the legacy `POST /api/search-device` trigger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchDeviceRequest<'a> {
    pub phone_number: &'a str,
}

/// Free-form `{ "message": ... }` acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendMessage {
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body shape: `{ "message": ... }` or `{ "error": ... }`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
