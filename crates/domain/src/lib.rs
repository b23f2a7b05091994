//! `coap-domain`: shared configuration and request types for coap-cli.
//!
//! Everything here is plain data: the layered [`ClientConfig`] loaded from
//! TOML, and the immutable [`RequestSpec`] describing a single invocation.
//! Neither the certificate loader nor the client engine keeps process-wide
//! state; they receive these values explicitly.

pub mod config;
pub mod error;
pub mod request;

pub use config::ClientConfig;
pub use error::{ConfigError, Result};
pub use request::{Method, RequestSpec};
