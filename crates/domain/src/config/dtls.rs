use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DTLS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Secure-transport settings.
///
/// Identity material comes either from `certs_dir` (which must contain
/// `client.key`, `client.crt` and `ca.crt`) or from the explicit file paths.
/// Setting `certs_dir` implies `enabled`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub certs_dir: Option<PathBuf>,
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Verify the server certificate chain and name against the CA pool.
    /// Off by default: deployments commonly run self-managed CAs whose
    /// server certificates do not carry the dialled host name.
    #[serde(default)]
    pub verify_server: bool,
    /// Name checked against the server certificate when `verify_server` is
    /// on.  Defaults to the configured host.
    #[serde(default)]
    pub server_name: Option<String>,
}

impl DtlsConfig {
    /// Whether a secure session should be dialled at all.
    pub fn is_active(&self) -> bool {
        self.enabled || self.certs_dir.is_some()
    }

    /// Whether any identity source was configured.
    pub fn has_identity_source(&self) -> bool {
        self.certs_dir.is_some()
            || self.cert_file.is_some()
            || self.key_file.is_some()
            || self.ca_file.is_some()
    }
}
