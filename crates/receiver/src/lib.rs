//! Server-side transport for a framed log-shipping protocol over TLS.
//!
//! Remote shippers hold long-lived TLS connections and stream frames
//! (`signature + be32 length + payload`). The [`server::Listener`] accepts and
//! handshakes them one at a time, runs a [`server::Connection`] per peer on
//! its own task, and passes every frame to a caller-supplied
//! [`server::Processor`].

pub mod config;
pub mod error;
pub mod server;
pub mod telemetry;

pub use config::{Config, ServerConfig};
pub use error::{ConfigError, HandshakeError, ServerError};
