//! High-level commands for stagehand operations.
//!
//! Each command wraps the core services behind options and report structs so
//! that frontends only deal with input parsing and rendering.

pub mod deploy;
pub mod env;
pub mod upgrade;

pub use deploy::{
    DeployCommand, DeployRunReport, DeployStatusReport, DeployTarget, LockStatusReport,
    SegmentStatus,
};
pub use env::{EnvCommand, EnvReport, EnvSummary, NewEnvOptions};
pub use upgrade::{PathsReport, RegisterReport, UpgradeCommand, UpgradeEntry};
