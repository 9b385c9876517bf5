// HTTP session API of the push backend.

pub mod client;
pub mod models;

pub use client::BackendClient;
pub use models::{
    BackendMessage, DeviceRecord, PushAccepted, PushRequest, SessionPhase, SessionStatus,
};
