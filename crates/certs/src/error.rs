use std::path::PathBuf;

/// Everything that can go wrong while loading identity material.
#[derive(thiserror::Error, Debug)]
pub enum CertError {
    /// No PEM block could be decoded from the input.
    #[error("malformed PEM: {0}")]
    MalformedPem(String),

    #[error("unexpected PEM block `{label}`, expected CERTIFICATE")]
    UnexpectedBlockType { label: String },

    /// A PKCS#8 wrapper around something other than RSA or EC.
    #[error("unsupported key type in PKCS#8 wrapper (algorithm {oid})")]
    UnsupportedKeyType { oid: String },

    #[error("no private key found (tried PKCS#1, PKCS#8, SEC1)")]
    NoPrivateKeyFound,

    #[error("certificate #{index} is not a valid X.509 certificate: {reason}")]
    InvalidCertificate { index: usize, reason: String },

    #[error("identity file missing: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("client certificate and key must be supplied together")]
    IncompleteIdentity,

    #[error("private key does not match the leaf certificate")]
    KeyMismatch,

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CertError>;
