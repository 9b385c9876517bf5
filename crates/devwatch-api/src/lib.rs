//! Async clients for the devwatch push backend.
//!
//! Two surfaces, one error type:
//!
//! - [`BackendClient`] talks to the HTTP session API (`/api/push/*`,
//!   `/api/debug/devices`, `/api/session/end`).
//! - [`StompClient`] holds the STOMP-over-WebSocket connection that
//!   carries live device updates.
//!
//! Neither client retries or reconnects on its own; that policy lives in
//! `devwatch-core`.

pub mod backend;
pub mod error;
pub mod stomp;
pub mod transport;
pub mod websocket;

pub use backend::{
    BackendClient, BackendMessage, DeviceRecord, PushAccepted, PushRequest, SessionPhase,
    SessionStatus,
};
pub use error::Error;
pub use transport::TransportConfig;
pub use websocket::{StompClient, StompConfig, StompMessage, SubscriptionId};
