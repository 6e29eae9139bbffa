//! Tracing setup: structured JSON logs, optionally exported over OTLP.
//!
//! The server itself only emits `tracing` events. Without a subscriber those
//! events go nowhere, which is how an embedding application runs it silently.
//!
//! Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//! overrides it.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
