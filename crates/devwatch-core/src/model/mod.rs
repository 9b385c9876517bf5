// ── Tracker domain model ──
//
// What the pipeline publishes: the committed device snapshot, metadata
// about the payload that carried it, and the observable tracker state.

pub mod snapshot;
pub mod status;

pub use snapshot::{DeviceSnapshot, PayloadInfo, UpdateSource};
pub use status::{LinkState, TrackerState, TrackerStatus};
