//! Configuration loading and validation for the receiver.
//!
//! [`Config`] is the operator-facing surface, read from environment variables
//! at startup. [`ServerConfig`] is what the listener actually consumes: the
//! same settings with the TLS material already loaded into memory.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::server::tls;

/// Idle budget applied before every blocking read or write on a connection.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);

/// Upper bound on a single TLS handshake in the accept loop.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Validated receiver configuration, as read from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address to bind the listening socket to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to bind; `0` lets the OS pick one.
    #[serde(default)]
    pub bind_port: u16,

    /// PEM certificate chain. **Required.**
    pub tls_cert_path: String,

    /// PEM private key. **Required.**
    pub tls_key_path: String,

    /// Passphrase for an encrypted private key.
    #[serde(default)]
    pub tls_key_passphrase: Option<String>,

    /// Require and verify client certificates.
    #[serde(default)]
    pub verify_peer: bool,

    /// Trust the bundled Mozilla root set when verifying peers.
    #[serde(default)]
    pub use_system_ca: bool,

    /// PEM file or directory of PEM files to verify peers against.
    #[serde(default)]
    pub ca_path: Option<String>,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Tracing log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP endpoint for span export. Logs only when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}
fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}
fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_secs()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.bind_address, "BIND_ADDRESS")?;
        ensure_non_empty(&self.tls_cert_path, "TLS_CERT_PATH")?;
        ensure_non_empty(&self.tls_key_path, "TLS_KEY_PATH")?;

        if self.verify_peer && !self.use_system_ca && self.ca_path.is_none() {
            anyhow::bail!("VERIFY_PEER requires USE_SYSTEM_CA or CA_PATH");
        }
        if self.idle_timeout_secs == 0 {
            anyhow::bail!("IDLE_TIMEOUT_SECS must be > 0");
        }
        if self.handshake_timeout_secs == 0 {
            anyhow::bail!("HANDSHAKE_TIMEOUT_SECS must be > 0");
        }
        Ok(())
    }

    /// Load the TLS material from disk and produce the listener's config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any PEM file is unreadable or unusable.
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let cert_chain = tls::load_certs(Path::new(&self.tls_cert_path))?;
        let private_key = tls::load_private_key(
            Path::new(&self.tls_key_path),
            self.tls_key_passphrase.as_deref(),
        )?;
        let ca_certs = self
            .ca_path
            .as_deref()
            .map(|p| tls::load_ca_certs(Path::new(p)))
            .transpose()?;

        Ok(ServerConfig {
            address: self.bind_address.clone(),
            port: self.bind_port,
            cert_chain,
            private_key: Some(private_key),
            verify_peer: self.verify_peer,
            use_system_ca: self.use_system_ca,
            ca_certs,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
        })
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

/// Immutable listener configuration with TLS material already in memory.
#[derive(Debug)]
pub struct ServerConfig {
    pub address: String,
    /// `0` for an OS-assigned port; see [`crate::server::Listener::port`].
    pub port: u16,
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: Option<PrivateKeyDer<'static>>,
    pub verify_peer: bool,
    pub use_system_ca: bool,
    /// Explicit trust anchors for peer verification.
    pub ca_certs: Option<Vec<CertificateDer<'static>>>,
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl ServerConfig {
    /// Config with the default bind address, an ephemeral port and peer
    /// verification disabled.
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    ) -> Self {
        Self {
            address: default_bind_address(),
            port: 0,
            cert_chain,
            private_key: Some(private_key),
            verify_peer: false,
            use_system_ca: false,
            ca_certs: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Check the construction invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the certificate or key is missing, when
    /// peer verification has no CA source, or when a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cert_chain.is_empty() {
            return Err(ConfigError::MissingCertificate);
        }
        if self.private_key.is_none() {
            return Err(ConfigError::MissingKey);
        }
        if self.verify_peer && !self.use_system_ca && self.ca_certs.is_none() {
            return Err(ConfigError::NoCaSource);
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("idle timeout must be > 0".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid("handshake timeout must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::PrivatePkcs8KeyDer;

    fn env_config() -> Config {
        Config {
            bind_address: default_bind_address(),
            bind_port: 0,
            tls_cert_path: "/etc/receiver/tls.crt".into(),
            tls_key_path: "/etc/receiver/tls.key".into(),
            tls_key_passphrase: None,
            verify_peer: false,
            use_system_ca: false,
            ca_path: None,
            idle_timeout_secs: default_idle_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            log_level: default_log_level(),
            otel_exporter_otlp_endpoint: None,
        }
    }

    fn dummy_material() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (
            vec![CertificateDer::from(vec![0x30, 0x00])],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(vec![0x30, 0x00])),
        )
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_bind_address(), "0.0.0.0");
        assert_eq!(default_idle_timeout(), 1800);
        assert_eq!(default_handshake_timeout(), 30);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(env_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_cert_path() {
        let mut cfg = env_config();
        cfg.tls_cert_path = " ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_verify_peer_without_ca() {
        let mut cfg = env_config();
        cfg.verify_peer = true;
        assert!(cfg.validate().is_err());

        cfg.ca_path = Some("/etc/receiver/ca".into());
        assert!(cfg.validate().is_ok());

        cfg.ca_path = None;
        cfg.use_system_ca = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_idle_timeout() {
        let mut cfg = env_config();
        cfg.idle_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn server_config_reports_missing_files() {
        let mut cfg = env_config();
        cfg.tls_cert_path = "/nonexistent/receiver/tls.crt".into();
        assert!(matches!(cfg.server_config(), Err(ConfigError::Pem { .. })));
    }

    #[test]
    fn server_config_requires_certificate_and_key() {
        let (_, key) = dummy_material();
        let cfg = ServerConfig::new(Vec::new(), key);
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingCertificate)));

        let (certs, key) = dummy_material();
        let mut cfg = ServerConfig::new(certs, key);
        cfg.private_key = None;
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingKey)));
    }

    #[test]
    fn server_config_requires_ca_source_for_verification() {
        let (certs, key) = dummy_material();
        let mut cfg = ServerConfig::new(certs, key);
        assert!(cfg.validate().is_ok());

        cfg.verify_peer = true;
        assert!(matches!(cfg.validate(), Err(ConfigError::NoCaSource)));

        cfg.use_system_ca = true;
        assert!(cfg.validate().is_ok());

        cfg.use_system_ca = false;
        cfg.ca_certs = Some(Vec::new());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn server_config_defaults() {
        let (certs, key) = dummy_material();
        let cfg = ServerConfig::new(certs, key);
        assert_eq!(cfg.address, "0.0.0.0");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.idle_timeout, Duration::from_secs(1800));
        assert!(!cfg.verify_peer);
    }
}
