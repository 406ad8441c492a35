//! wardenwatch - watchdog for the warden engine core
//!
//! Runs independently of `wardend`: keeps its units alive, consumes restart
//! requests, probes its health surface and rolls the deployment back after
//! sustained failure.

pub mod checks;
pub mod config;
pub mod deploy;
pub mod supervisor;

pub use checks::{
    FakeHealthProbe, FakeProxyCheck, FakeServices, HealthProbe, ProxyCheck, ServiceControl,
};
pub use config::WatchConfig;
pub use deploy::Deployments;
pub use supervisor::{CycleReport, RequestHandling, RollbackOutcome, Supervisor, WatchState};
