//! Tracing initialization
//!
//! Text output by default, JSON lines when `LOG_FORMAT=json`. `RUST_LOG` overrides
//! the default filter.

mod init_basic;

pub use init_basic::{init_telemetry, shutdown_telemetry};
