// ── Observable tracker state ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::snapshot::{DeviceSnapshot, PayloadInfo, UpdateSource};

/// Subscription link state, as seen by the subscription manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// Connected to the broker, no topic subscription yet.
    ConnectedUnsubscribed,
    Subscribed,
}

/// Progress of the current search, rendered as the user-visible status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrackerStatus {
    Idle,
    /// Push request in flight.
    Sending,
    /// Push accepted; waiting on either delivery path.
    AwaitingDevice,
    ReceivingChunks { received: usize, total: usize },
    /// Last status poll answer that was neither responded nor failed.
    Polling { status: String, detail: String },
    FetchingDevice,
    Received { source: UpdateSource },
    /// The status poll stopped with an error. Live updates may still land.
    PollFailed { message: String },
    /// The search itself failed (push rejected or bad input).
    Failed { message: String },
    Ended,
}

impl TrackerStatus {
    /// A search is over once data arrived or it failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Received { .. } | Self::Failed { .. } | Self::Ended)
    }
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Sending => f.write_str("Sending push request to device..."),
            Self::AwaitingDevice => {
                f.write_str("Push sent successfully. Waiting for device response...")
            }
            Self::ReceivingChunks { received, total } => {
                write!(f, "Receiving chunks: {received}/{total}")
            }
            Self::Polling { status, detail } => write!(f, "Status: {status} - {detail}"),
            Self::FetchingDevice => f.write_str("Device responded! Fetching device data..."),
            Self::Received {
                source: UpdateSource::Push,
            } => f.write_str("Device data received via live update!"),
            Self::Received {
                source: UpdateSource::Poll,
            } => f.write_str("Device data received successfully!"),
            Self::PollFailed { message } | Self::Failed { message } => {
                write!(f, "Error: {message}")
            }
            Self::Ended => f.write_str("Session ended."),
        }
    }
}

/// Everything a consumer observes about the tracker.
///
/// Published through a `watch` channel; every mutation replaces the value
/// atomically, so readers never see a snapshot for one entity paired with
/// the session of another.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerState {
    /// Phone number currently tracked.
    pub entity: Option<String>,
    /// Backend session of the current search.
    pub session_id: Option<String>,
    pub snapshot: Option<DeviceSnapshot>,
    pub payload: Option<PayloadInfo>,
    pub last_update: Option<DateTime<Utc>>,
    pub status: TrackerStatus,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            entity: None,
            session_id: None,
            snapshot: None,
            payload: None,
            last_update: None,
            status: TrackerStatus::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines() {
        assert_eq!(
            TrackerStatus::ReceivingChunks {
                received: 1,
                total: 3
            }
            .to_string(),
            "Receiving chunks: 1/3"
        );
        assert_eq!(
            TrackerStatus::Polling {
                status: "sent".into(),
                detail: "Processing".into()
            }
            .to_string(),
            "Status: sent - Processing"
        );
        assert_eq!(
            TrackerStatus::Failed {
                message: "token expired".into()
            }
            .to_string(),
            "Error: token expired"
        );
        assert_eq!(
            TrackerStatus::PollFailed {
                message: "Request failed: token expired".into()
            }
            .to_string(),
            "Error: Request failed: token expired"
        );
    }

    #[test]
    fn terminal_states() {
        assert!(TrackerStatus::Ended.is_terminal());
        assert!(
            TrackerStatus::Received {
                source: UpdateSource::Poll
            }
            .is_terminal()
        );
        assert!(!TrackerStatus::AwaitingDevice.is_terminal());
        assert!(
            !TrackerStatus::PollFailed {
                message: "boom".into()
            }
            .is_terminal()
        );
    }

    #[test]
    fn link_state_display() {
        assert_eq!(
            LinkState::ConnectedUnsubscribed.to_string(),
            "connected-unsubscribed"
        );
    }
}
