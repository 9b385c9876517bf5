// devwatch-core: live-update ingestion pipeline between devwatch-api and
// consumers (CLI).

pub mod assembler;
pub mod config;
pub mod connector;
pub mod error;
pub mod model;
pub mod poll;
pub mod sink;
pub mod stream;
pub mod subscription;
pub mod tracker;

// ── Primary re-exports ──────────────────────────────────────────────
pub use assembler::{Assembly, InboundUpdate, Materialized, PayloadAssembler, UpdateKind};
pub use config::{DEFAULT_TOPIC, RetryPolicy, TrackerConfig, derive_websocket_url};
pub use connector::Connector;
pub use error::CoreError;
pub use model::{
    DeviceSnapshot, LinkState, PayloadInfo, TrackerState, TrackerStatus, UpdateSource,
};
pub use poll::{PollHandle, PollOutcome, spawn_poll};
pub use sink::UpdateSink;
pub use stream::{StateStream, StateWatchStream};
pub use subscription::SubscriptionManager;
pub use tracker::Tracker;
