//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod store;
pub mod telemetry;
pub mod watcher;
