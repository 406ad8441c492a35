//! Warden common types and persistence.
//!
//! Shared by `wardend` (engine core) and `wardenwatch` (supervisor). The two
//! processes never share memory: everything they exchange lives in the files
//! and wire types defined here.

pub mod api;
pub mod atomic;
pub mod config;
pub mod error;
pub mod gate;
pub mod health;
pub mod lkg;
pub mod mode;
pub mod paths;
pub mod restart;
pub mod systemd;
pub mod timeline;

pub use config::{ConfigSnapshot, ConfigStore, EditableConfig};
pub use error::{Result, WardenError};
pub use gate::{allowed, GateDecision};
pub use health::{HealthPolicy, HealthRecord, HealthSnapshot, HealthState};
pub use lkg::LastKnownGood;
pub use mode::OperatingMode;
pub use paths::StatePaths;
pub use restart::{RestartRequest, RestartSignal};
pub use timeline::{HealthTimeline, HealthTimelineEntry};

/// Crate version, reported on the health surface
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
