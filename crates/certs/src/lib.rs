//! `coap-certs`: client identity material for secure CoAP sessions.
//!
//! Turns PEM bytes into typed values the transport can consume:
//!
//! - [`CertificateChain`]: every `CERTIFICATE` block of a bundle, in order.
//! - [`KeyMaterial`]: an RSA key or an EC key on a NIST curve, normalized to PKCS#8 DER.
//! - [`TrustPool`]: CA certificates parsed into trust anchors.
//! - [`SecureIdentity`]: a chain paired with its key.
//!
//! Key parsing is an ordered fallback chain (PKCS#1, then PKCS#8, then SEC1).
//! Each attempt is pure, so the first one that succeeds wins and failed
//! attempts leave nothing behind.

pub mod chain;
pub mod error;
pub mod identity;
pub mod key;

pub use chain::{load_certificate_chain, load_trust_pool, CertificateChain, TrustPool};
pub use error::CertError;
pub use identity::{IdentityBundle, IdentityFiles, SecureIdentity};
pub use key::{load_private_key, EcCurve, KeyFormat, KeyKind, KeyMaterial};
