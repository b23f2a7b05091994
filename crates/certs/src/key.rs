//! Private key loading.
//!
//! The DER payload of the first PEM block is tried as PKCS#1, then PKCS#8,
//! then SEC1.  Whatever parses first is normalized to PKCS#8 so the
//! transport only ever sees one encoding.

use std::fmt;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use pkcs8::der::{AnyRef, Encode};
use pkcs8::{AlgorithmIdentifierRef, DecodePrivateKey, EncodePrivateKey, ObjectIdentifier, PrivateKeyInfo};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sec1::EcPrivateKey;
use zeroize::Zeroizing;

use crate::error::{CertError, Result};

/// rsaEncryption (RFC 8017).
const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
/// id-ecPublicKey (RFC 5480).
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Rsa,
    Ec,
}

/// Named curves accepted for EC keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P224,
    P256,
    P384,
    P521,
}

impl EcCurve {
    const ALL: [EcCurve; 4] = [EcCurve::P224, EcCurve::P256, EcCurve::P384, EcCurve::P521];

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            EcCurve::P224 => ObjectIdentifier::new_unwrap("1.3.132.0.33"),
            EcCurve::P256 => ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7"),
            EcCurve::P384 => ObjectIdentifier::new_unwrap("1.3.132.0.34"),
            EcCurve::P521 => ObjectIdentifier::new_unwrap("1.3.132.0.35"),
        }
    }

    pub fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|curve| curve.oid() == oid)
    }

    /// Length of the private scalar in bytes.
    fn scalar_len(self) -> usize {
        match self {
            EcCurve::P224 => 28,
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }
}

/// The encoding the key was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Pkcs1,
    Pkcs8,
    Sec1,
}

/// A private key, held as PKCS#8 DER in memory that is wiped on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    kind: KeyKind,
    curve: Option<EcCurve>,
    format: KeyFormat,
    pkcs8: Zeroizing<Vec<u8>>,
    /// Raw public key bytes (RSA modulus or uncompressed EC point), when the
    /// key could be decoded far enough to derive them.
    public: Option<Vec<u8>>,
}

impl KeyMaterial {
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// The named curve of an EC key; `None` for RSA.
    pub fn curve(&self) -> Option<EcCurve> {
        self.curve
    }

    pub fn format(&self) -> KeyFormat {
        self.format
    }

    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8
    }

    pub(crate) fn public_bytes(&self) -> Option<&[u8]> {
        self.public.as_deref()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kind", &self.kind)
            .field("curve", &self.curve)
            .field("format", &self.format)
            .field("pkcs8", &"<redacted>")
            .finish()
    }
}

/// Load the private key held in the first PEM block of `pem_bytes`.
pub fn load_private_key(pem_bytes: &[u8]) -> Result<KeyMaterial> {
    let block = pem::parse(pem_bytes).map_err(|e| CertError::MalformedPem(e.to_string()))?;
    if !block.tag().ends_with("PRIVATE KEY") {
        return Err(CertError::MalformedPem(format!(
            "block `{}` is not a private key",
            block.tag()
        )));
    }

    let key = parse_der(block.contents())?;
    tracing::debug!(kind = ?key.kind, curve = ?key.curve, format = ?key.format, "private key loaded");
    Ok(key)
}

fn parse_der(der: &[u8]) -> Result<KeyMaterial> {
    if let Some(key) = try_pkcs1(der) {
        return Ok(key);
    }
    // A PKCS#8 wrapper whose inner key decodes is final: either it holds
    // RSA/EC or the key type is unsupported.
    if let Some(result) = try_pkcs8(der) {
        return result;
    }
    if let Some(key) = try_sec1(der) {
        return Ok(key);
    }
    Err(CertError::NoPrivateKeyFound)
}

fn try_pkcs1(der: &[u8]) -> Option<KeyMaterial> {
    let key = RsaPrivateKey::from_pkcs1_der(der).ok()?;
    let doc = key.to_pkcs8_der().ok()?;
    Some(KeyMaterial {
        kind: KeyKind::Rsa,
        curve: None,
        format: KeyFormat::Pkcs1,
        pkcs8: Zeroizing::new(doc.as_bytes().to_vec()),
        public: Some(key.n().to_bytes_be()),
    })
}

fn try_pkcs8(der: &[u8]) -> Option<Result<KeyMaterial>> {
    let info = PrivateKeyInfo::try_from(der).ok()?;
    let oid = info.algorithm.oid;

    if oid == OID_RSA_ENCRYPTION {
        let key = RsaPrivateKey::from_pkcs8_der(der).ok()?;
        return Some(Ok(KeyMaterial {
            kind: KeyKind::Rsa,
            curve: None,
            format: KeyFormat::Pkcs8,
            pkcs8: Zeroizing::new(der.to_vec()),
            public: Some(key.n().to_bytes_be()),
        }));
    }

    if oid == OID_EC_PUBLIC_KEY {
        let curve_oid = info.algorithm.parameters_oid().ok()?;
        let Some(curve) = EcCurve::from_oid(curve_oid) else {
            return Some(Err(CertError::UnsupportedKeyType {
                oid: curve_oid.to_string(),
            }));
        };
        let inner = EcPrivateKey::try_from(info.private_key).ok()?;
        let public = ec_public_bytes(curve, &inner)?;
        return Some(Ok(KeyMaterial {
            kind: KeyKind::Ec,
            curve: Some(curve),
            format: KeyFormat::Pkcs8,
            pkcs8: Zeroizing::new(der.to_vec()),
            public,
        }));
    }

    Some(Err(CertError::UnsupportedKeyType {
        oid: oid.to_string(),
    }))
}

fn try_sec1(der: &[u8]) -> Option<KeyMaterial> {
    let inner = EcPrivateKey::try_from(der).ok()?;
    let curve = inner
        .parameters
        .and_then(|params| params.named_curve())
        .and_then(EcCurve::from_oid)?;
    let public = ec_public_bytes(curve, &inner)?;
    Some(KeyMaterial {
        kind: KeyKind::Ec,
        curve: Some(curve),
        format: KeyFormat::Sec1,
        pkcs8: Zeroizing::new(wrap_sec1(curve, der)?),
        public,
    })
}

/// Public point of an EC key, uncompressed.
///
/// P-256 and P-384 points are derived from the scalar, which also checks
/// that the scalar is valid for the curve.  Other curves fall back to the
/// optional embedded point.  `None` means the scalar is unusable.
fn ec_public_bytes(curve: EcCurve, key: &EcPrivateKey<'_>) -> Option<Option<Vec<u8>>> {
    let derived = match curve {
        EcCurve::P256 => p256::SecretKey::from_slice(key.private_key)
            .ok()?
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec(),
        EcCurve::P384 => p384::SecretKey::from_slice(key.private_key)
            .ok()?
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec(),
        EcCurve::P224 | EcCurve::P521 => {
            if key.private_key.len() != curve.scalar_len() {
                return None;
            }
            return Some(key.public_key.map(<[u8]>::to_vec));
        }
    };
    Some(Some(derived))
}

/// Wrap a SEC1 `ECPrivateKey` in a PKCS#8 envelope naming its curve.
fn wrap_sec1(curve: EcCurve, sec1_der: &[u8]) -> Option<Vec<u8>> {
    let curve_oid = curve.oid();
    let info = PrivateKeyInfo {
        algorithm: AlgorithmIdentifierRef {
            oid: OID_EC_PUBLIC_KEY,
            parameters: Some(AnyRef::from(&curve_oid)),
        },
        private_key: sec1_der,
        public_key: None,
    };
    info.to_der().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_block_is_not_a_key() {
        let pem = pem::encode(&pem::Pem::new("CERTIFICATE", vec![0x30, 0x00]));
        let err = load_private_key(pem.as_bytes()).unwrap_err();
        assert!(matches!(err, CertError::MalformedPem(_)), "got {err:?}");
    }

    #[test]
    fn empty_input_is_malformed() {
        let err = load_private_key(b"").unwrap_err();
        assert!(matches!(err, CertError::MalformedPem(_)));
    }

    #[test]
    fn unparseable_der_finds_no_key() {
        let pem = pem::encode(&pem::Pem::new("PRIVATE KEY", vec![0x30, 0x03, 0x02, 0x01, 0x00]));
        let err = load_private_key(pem.as_bytes()).unwrap_err();
        assert!(matches!(err, CertError::NoPrivateKeyFound), "got {err:?}");
    }

    fn pkcs8_pem(algorithm: AlgorithmIdentifierRef<'_>, private_key: &[u8]) -> String {
        let der = PrivateKeyInfo::new(algorithm, private_key).to_der().unwrap();
        pem::encode(&pem::Pem::new("PRIVATE KEY", der))
    }

    #[test]
    fn rsa_wrapper_around_garbage_finds_no_key() {
        let algorithm = AlgorithmIdentifierRef {
            oid: OID_RSA_ENCRYPTION,
            parameters: None,
        };
        let pem = pkcs8_pem(algorithm, b"garbage-not-an-rsa-key");
        let err = load_private_key(pem.as_bytes()).unwrap_err();
        assert!(matches!(err, CertError::NoPrivateKeyFound), "got {err:?}");
    }

    #[test]
    fn ec_wrapper_around_garbage_finds_no_key() {
        let curve = EcCurve::P384.oid();
        let algorithm = AlgorithmIdentifierRef {
            oid: OID_EC_PUBLIC_KEY,
            parameters: Some(AnyRef::from(&curve)),
        };
        let pem = pkcs8_pem(algorithm, b"garbage-not-an-ec-key");
        let err = load_private_key(pem.as_bytes()).unwrap_err();
        assert!(matches!(err, CertError::NoPrivateKeyFound), "got {err:?}");
    }

    #[test]
    fn unnamed_curve_is_unsupported() {
        // brainpoolP256r1
        let curve = ObjectIdentifier::new_unwrap("1.3.36.3.3.2.8.1.1.7");
        let algorithm = AlgorithmIdentifierRef {
            oid: OID_EC_PUBLIC_KEY,
            parameters: Some(AnyRef::from(&curve)),
        };
        match load_private_key(pkcs8_pem(algorithm, b"").as_bytes()).unwrap_err() {
            CertError::UnsupportedKeyType { oid } => assert_eq!(oid, "1.3.36.3.3.2.8.1.1.7"),
            other => panic!("expected UnsupportedKeyType, got {other:?}"),
        }
    }

    #[test]
    fn curve_oids_are_recognised() {
        assert_eq!(
            EcCurve::from_oid(ObjectIdentifier::new_unwrap("1.3.132.0.35")),
            Some(EcCurve::P521)
        );
        assert_eq!(EcCurve::from_oid(OID_RSA_ENCRYPTION), None);
    }

    #[test]
    fn debug_redacts_key_bytes() {
        let key = KeyMaterial {
            kind: KeyKind::Ec,
            curve: Some(EcCurve::P256),
            format: KeyFormat::Sec1,
            pkcs8: Zeroizing::new(vec![0xde, 0xad]),
            public: None,
        };
        let rendered = format!("{key:?}");
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("222"));
    }
}
