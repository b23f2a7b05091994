//! Client identity: a certificate chain paired with its private key, plus the
//! CA pool used to check the server.

use std::path::{Path, PathBuf};

use crate::chain::{load_certificate_chain, load_trust_pool, CertificateChain, TrustPool};
use crate::error::{CertError, Result};
use crate::key::{load_private_key, KeyMaterial};

pub const CLIENT_KEY_FILE: &str = "client.key";
pub const CLIENT_CERT_FILE: &str = "client.crt";
pub const CA_CERT_FILE: &str = "ca.crt";

/// The client side of a DTLS handshake.
#[derive(Debug, Clone)]
pub struct SecureIdentity {
    chain: CertificateChain,
    key: KeyMaterial,
}

impl SecureIdentity {
    /// Pair a chain with a key, rejecting a key whose public half does not
    /// appear in the leaf certificate.
    pub fn new(chain: CertificateChain, key: KeyMaterial) -> Result<Self> {
        if let Some(public) = key.public_bytes() {
            let leaf = chain.leaf().as_ref();
            if !contains(leaf, public) {
                return Err(CertError::KeyMismatch);
            }
        }
        Ok(Self { chain, key })
    }

    /// Build an identity from a private key PEM and a certificate bundle PEM.
    pub fn from_pem(key_pem: &[u8], cert_pem: &[u8]) -> Result<Self> {
        let key = load_private_key(key_pem)?;
        let chain = load_certificate_chain(cert_pem)?;
        Self::new(chain, key)
    }

    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// What [`IdentityFiles::load`] produces.
#[derive(Debug, Clone)]
pub struct IdentityBundle {
    /// `None` when no client certificate was configured.
    pub identity: Option<SecureIdentity>,
    pub trust_pool: TrustPool,
}

/// Where identity material lives on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFiles {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca: Option<PathBuf>,
}

impl IdentityFiles {
    /// Resolve the fixed file names inside a certificates directory.
    ///
    /// All three files are required in directory mode.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let resolve = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(CertError::MissingFile { path })
            }
        };
        Ok(Self {
            key: Some(resolve(CLIENT_KEY_FILE)?),
            cert: Some(resolve(CLIENT_CERT_FILE)?),
            ca: Some(resolve(CA_CERT_FILE)?),
        })
    }

    /// Explicit paths.  Certificate and key go together; the CA is optional.
    pub fn explicit(cert: Option<PathBuf>, key: Option<PathBuf>, ca: Option<PathBuf>) -> Result<Self> {
        if cert.is_some() != key.is_some() {
            return Err(CertError::IncompleteIdentity);
        }
        Ok(Self { cert, key, ca })
    }

    pub fn has_identity(&self) -> bool {
        self.cert.is_some()
    }

    pub fn load(&self) -> Result<IdentityBundle> {
        let identity = match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => {
                let key_pem = read(key)?;
                let cert_pem = read(cert)?;
                Some(SecureIdentity::from_pem(&key_pem, &cert_pem)?)
            }
            (None, None) => None,
            _ => return Err(CertError::IncompleteIdentity),
        };

        let trust_pool = match &self.ca {
            Some(ca) => load_trust_pool(&read(ca)?)?,
            None => TrustPool::empty(),
        };

        tracing::info!(
            client_certificate = identity.is_some(),
            trust_anchors = trust_pool.len(),
            "identity material loaded"
        );
        Ok(IdentityBundle {
            identity,
            trust_pool,
        })
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            CertError::MissingFile {
                path: path.to_path_buf(),
            }
        } else {
            CertError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cert_without_key_is_incomplete() {
        let err = IdentityFiles::explicit(Some("client.crt".into()), None, None).unwrap_err();
        assert!(matches!(err, CertError::IncompleteIdentity));
    }

    #[test]
    fn ca_alone_is_fine() {
        let files = IdentityFiles::explicit(None, None, Some("ca.crt".into())).unwrap();
        assert!(!files.has_identity());
    }

    #[test]
    fn nothing_configured_loads_empty_bundle() {
        let bundle = IdentityFiles::default().load().unwrap();
        assert!(bundle.identity.is_none());
        assert!(bundle.trust_pool.is_empty());
    }

    #[test]
    fn missing_ca_path_reports_the_path() {
        let files = IdentityFiles::explicit(None, None, Some("/nonexistent/ca.crt".into())).unwrap();
        match files.load().unwrap_err() {
            CertError::MissingFile { path } => assert_eq!(path, Path::new("/nonexistent/ca.crt")),
            other => panic!("expected MissingFile, got {other:?}"),
        }
    }

    #[test]
    fn subslice_search() {
        assert!(contains(b"abcdef", b"cde"));
        assert!(!contains(b"abcdef", b"xyz"));
        assert!(!contains(b"abc", b""));
    }
}
