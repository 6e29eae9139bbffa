//! TLS listener and framing engine.
//!
//! # Responsibilities
//! - Build the TLS context and bind the listening socket ([`tls`], [`listener`]).
//! - Run one framing loop per accepted connection ([`connection`]).
//! - Hand decoded frames to the caller's [`Processor`].

pub mod connection;
pub mod listener;
pub mod processor;
pub mod tls;

pub use connection::{CloseReason, Connection, ConnectionError};
pub use listener::{Listener, ShutdownHandle};
pub use processor::{LoggingProcessor, Processor};
