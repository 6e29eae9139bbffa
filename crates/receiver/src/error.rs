//! Server-level error types.
//!
//! Only [`ConfigError`] (and a failed bind) is fatal to the whole server.
//! [`HandshakeError`] is scoped to a single accept attempt; per-connection
//! failures live in [`crate::server::connection::ConnectionError`].

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Peer string used when the remote address cannot be determined.
pub const UNKNOWN_PEER: &str = "unknown";

/// Invalid or incomplete server configuration. Raised at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No certificate chain was supplied.
    #[error("a TLS certificate is required")]
    MissingCertificate,

    /// No private key was supplied.
    #[error("a TLS private key is required")]
    MissingKey,

    /// Peer verification was requested without any CA to verify against.
    #[error("peer verification requires the system CA store or an explicit CA path")]
    NoCaSource,

    /// The key file only holds an encrypted key, which rustls cannot load.
    #[error("private key in {path} is encrypted; supply an unencrypted PKCS#8, PKCS#1 or SEC1 key")]
    EncryptedKey { path: PathBuf },

    /// A PEM file could not be read or parsed.
    #[error("failed to read {path}: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A CA path yielded no certificates.
    #[error("no CA certificates found in {path}")]
    EmptyCaPath { path: PathBuf },

    /// rustls rejected the certificate/key pair.
    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    /// The client-certificate verifier could not be built.
    #[error("invalid peer verification settings: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    /// A plain configuration value is out of range.
    #[error("{0}")]
    Invalid(String),
}

/// A single accept attempt failed before the connection became usable.
///
/// Never fatal: the listener logs it and goes back to accepting.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The TCP accept itself failed; no peer is known.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The TLS negotiation failed (I/O error, EOF or TLS alert).
    #[error("TLS handshake with {peer} failed: {source}")]
    Tls {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// The peer did not finish the handshake in time.
    #[error("TLS handshake with {peer} timed out after {timeout:?}")]
    Timeout { peer: String, timeout: Duration },
}

impl HandshakeError {
    /// Best-known peer string for diagnostics.
    pub fn peer(&self) -> &str {
        match self {
            HandshakeError::Accept(_) => UNKNOWN_PEER,
            HandshakeError::Tls { peer, .. } | HandshakeError::Timeout { peer, .. } => peer,
        }
    }
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}
