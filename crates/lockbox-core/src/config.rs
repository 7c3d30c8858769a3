use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{LockboxError, LockboxResult};

/// Minimum master key length accepted at startup.
pub const MIN_MASTER_KEY_LEN: usize = 16;

/// Top-level server configuration (loaded from lockbox.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockboxConfig {
    pub server: ServerConfig,
    pub keys: KeysConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address for gRPC (default: 127.0.0.1:3200)
    pub listen: String,
    /// PEM certificate chain; TLS is enabled when both cert and key are set
    pub tls_cert: Option<PathBuf>,
    /// PEM private key matching `tls_cert`
    pub tls_key: Option<PathBuf>,
    /// Seconds to wait for in-flight calls after a shutdown signal
    pub shutdown_grace_secs: u64,
    /// Largest upload the server will buffer, in bytes (default: 64 MiB)
    pub max_upload_bytes: usize,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Key material. Never written back out when the config is serialized.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Master key wrapping every per-secret data key
    #[serde(skip_serializing)]
    pub master_key: Option<String>,
    /// HMAC key signing bearer tokens
    #[serde(skip_serializing)]
    pub jwt_key: Option<String>,
}

impl fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("KeysConfig")
            .field("master_key", &redact(&self.master_key))
            .field("jwt_key", &redact(&self.jwt_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection string, or "memory" for the in-process store
    pub url: String,
}

/// Validated key material, ready to hand to the cipher and token issuer.
pub struct Keys {
    pub master_key: SecretString,
    pub jwt_key: SecretString,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3200".into(),
            tls_cert: None,
            tls_key: None,
            shutdown_grace_secs: 10,
            max_upload_bytes: 64 * 1024 * 1024,
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:lockbox.db".into(),
        }
    }
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url == "memory"
    }
}

impl LockboxConfig {
    /// Read and parse a TOML config file. Sections left out keep their defaults.
    pub fn from_file(path: &Path) -> LockboxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Check everything the daemon needs before it binds a socket.
    pub fn validate(&self) -> LockboxResult<()> {
        self.keys()?;

        match (&self.server.tls_cert, &self.server.tls_key) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(LockboxError::Config(
                    "server.tls_cert and server.tls_key must be set together".into(),
                ))
            }
            _ => {}
        }

        if self.server.max_upload_bytes == 0 {
            return Err(LockboxError::Config(
                "server.max_upload_bytes must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Extract the key material, refusing a missing or short master key and
    /// an empty token-signing key.
    pub fn keys(&self) -> LockboxResult<Keys> {
        let master_key = self.keys.master_key.as_deref().unwrap_or_default();
        if master_key.is_empty() {
            return Err(LockboxError::Config(
                "master key not set (keys.master_key or LOCKBOX_MASTER_KEY)".into(),
            ));
        }
        if master_key.chars().count() < MIN_MASTER_KEY_LEN {
            return Err(LockboxError::Config(format!(
                "master key must be at least {MIN_MASTER_KEY_LEN} characters"
            )));
        }

        let jwt_key = self.keys.jwt_key.as_deref().unwrap_or_default();
        if jwt_key.is_empty() {
            return Err(LockboxError::Config(
                "token signing key not set (keys.jwt_key or LOCKBOX_JWT_KEY)".into(),
            ));
        }

        Ok(Keys {
            master_key: SecretString::from(master_key.to_string()),
            jwt_key: SecretString::from(jwt_key.to_string()),
        })
    }

    pub fn tls_enabled(&self) -> bool {
        self.server.tls_cert.is_some() && self.server.tls_key.is_some()
    }
}
