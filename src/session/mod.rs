//! Session lifecycle: consent, host seam and the pipeline coordinator.

pub mod compliance;
pub mod coordinator;
pub mod host;
pub mod status;

pub use compliance::{AllowAll, ComplianceGate, ConsentList};
pub use coordinator::SessionCoordinator;
pub use host::{SessionHost, StaticRoster};
pub use status::PipelineStatus;
