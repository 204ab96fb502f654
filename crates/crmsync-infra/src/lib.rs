//! CRM Sync Infrastructure Library
//!
//! Shared infrastructure used by the sync binaries:
//! - Telemetry initialization (tracing subscriber)
//! - Retry controller with exponential backoff and jitter

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod retry;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

pub use retry::RetryPolicy;
