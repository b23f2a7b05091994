mod dtls;
mod keep_alive;
mod server;

pub use dtls::*;
pub use keep_alive::*;
pub use server::*;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Defaults for every invocation.  The CLI layers environment variables and
/// flags on top of whatever this resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub request: RequestDefaults,
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,
    #[serde(default)]
    pub dtls: DtlsConfig,
}

/// Per-request defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDefaults {
    /// CoAP Content-Format number attached to PUT/POST payloads.
    #[serde(default = "d_content_format")]
    pub content_format: u16,
    #[serde(default)]
    pub auth: Option<String>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            content_format: d_content_format(),
            auth: None,
        }
    }
}

/// `application/json`.
fn d_content_format() -> u16 {
    50
}

impl ClientConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`.  A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let config = Self::load(path)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".into()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must not be 0".into()));
        }
        let dtls = &self.dtls;
        if dtls.cert_file.is_some() != dtls.key_file.is_some() {
            return Err(ConfigError::Invalid(
                "dtls.cert_file and dtls.key_file must be set together".into(),
            ));
        }
        if dtls.certs_dir.is_some() && (dtls.cert_file.is_some() || dtls.ca_file.is_some()) {
            return Err(ConfigError::Invalid(
                "dtls.certs_dir cannot be combined with explicit certificate files".into(),
            ));
        }
        Ok(())
    }
}
