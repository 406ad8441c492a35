//! wardend - engine core for the warden device-health control plane
//!
//! Owns the active configuration, the device health monitor and the write
//! path to the device, and serves them over HTTP.

pub mod auth;
pub mod engine;
pub mod monitor;
pub mod probe;
pub mod routes;
pub mod server;
pub mod watcher;

pub use engine::{ApplyOutcome, ControlError, DeviceTestOutcome, Engine, ValidationRecord};
pub use monitor::{DeviceMonitor, ProbeTarget};
pub use probe::{ControlSink, DeviceProbe, TcpLineSink, TcpProbe};
