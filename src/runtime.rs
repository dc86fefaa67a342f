//! Runtime glue that wires configuration, stages, progress tracking,
//! telemetry, and runner orchestration around the host-facing source.

pub mod config;
pub mod error;
pub(crate) mod fatal;
pub mod progress;
pub mod runner;
pub mod source;
pub mod stage;
pub mod telemetry;
