//! Certificate bundles and the trust pool built from them.

use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use crate::error::{CertError, Result};

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Ordered DER certificates decoded from one PEM bundle.  Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certs: Vec<CertificateDer<'static>>,
}

impl CertificateChain {
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// The first certificate of the bundle (the end-entity for client chains).
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.certs[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &CertificateDer<'static>> {
        self.certs.iter()
    }

    pub fn as_slice(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    pub fn into_vec(self) -> Vec<CertificateDer<'static>> {
        self.certs
    }
}

/// Decode every PEM block of `pem_bytes` into a [`CertificateChain`].
///
/// Blocks are taken in bundle order; any block that is not a `CERTIFICATE`
/// aborts the load.  Input with no decodable block is [`CertError::MalformedPem`].
pub fn load_certificate_chain(pem_bytes: &[u8]) -> Result<CertificateChain> {
    let blocks = pem::parse_many(pem_bytes).map_err(|e| CertError::MalformedPem(e.to_string()))?;

    let mut certs = Vec::with_capacity(blocks.len());
    for block in blocks {
        if block.tag() != CERTIFICATE_LABEL {
            return Err(CertError::UnexpectedBlockType {
                label: block.tag().to_string(),
            });
        }
        certs.push(CertificateDer::from(block.into_contents()));
    }

    if certs.is_empty() {
        return Err(CertError::MalformedPem("no CERTIFICATE block found".into()));
    }

    tracing::debug!(certificates = certs.len(), "certificate chain loaded");
    Ok(CertificateChain { certs })
}

/// Trust anchors used to verify the server.  Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct TrustPool {
    anchors: Vec<CertificateDer<'static>>,
}

impl TrustPool {
    /// A pool with no anchors, used when no CA bundle is configured.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Accept every certificate of `chain` as a trust anchor.
    ///
    /// Each one must parse as an anchor; the first that does not fails the
    /// whole pool, so no partial pool escapes.
    pub fn from_chain(chain: &CertificateChain) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        for (index, cert) in chain.iter().enumerate() {
            roots
                .add(cert.clone())
                .map_err(|e| CertError::InvalidCertificate {
                    index,
                    reason: e.to_string(),
                })?;
        }
        Ok(Self {
            anchors: chain.as_slice().to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// DER of every anchor, in bundle order.
    pub fn anchors(&self) -> &[CertificateDer<'static>] {
        &self.anchors
    }
}

/// Build a [`TrustPool`] straight from a CA bundle.
pub fn load_trust_pool(pem_bytes: &[u8]) -> Result<TrustPool> {
    let chain = load_certificate_chain(pem_bytes)?;
    let pool = TrustPool::from_chain(&chain)?;
    tracing::debug!(anchors = pool.len(), "trust pool built");
    Ok(pool)
}
