//! `coap-cli`: command-line front end for the CoAP client engine.
//!
//! Parses flags, layers them over the TOML config, loads DTLS identity
//! material, then runs a single exchange or a supervised observation.

pub mod cli;
pub mod output;
