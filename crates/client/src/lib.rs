//! `coap-client`: CoAP request and observation engine over UDP or DTLS.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  TransportFactory::new("host:5684")                         │
//! │      .identity(bundle)          // DTLS when present        │
//! │      .keep_alive(policy)                                    │
//! │      .connect().await?          ──▶ Connection              │
//! │                                                             │
//! │  RequestDispatcher::new(&conn).dispatch(&spec, &opts)       │
//! │  ObservationSession::register(&conn, &spec, &opts, sink)    │
//! │      └──▶ supervise(observation, ctrl_c)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`Connection`] owns one datagram socket and a background reader that
//! matches inbound messages to pending exchanges by token, hands
//! notifications to observers, and acknowledges confirmable messages.
//! Confirmable requests are retransmitted with exponential back-off until
//! acknowledged or until the exchange deadline passes.
//!
//! # Message flow
//!
//! 1. Request goes out as CON with a fresh 8-byte token
//! 2. Empty ACK stops retransmission; the response may follow separately
//! 3. Piggybacked or separate response completes the exchange
//! 4. RST fails the exchange immediately
//! 5. Idle connections are probed with empty CON pings when keep-alive is on

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod keepalive;
pub mod message;
pub mod observe;
pub mod options;
pub mod transport;

#[cfg(test)]
mod testing;

// ── Re-exports ───────────────────────────────────────────────────────

pub use connection::{Connection, ExchangeParams, ACK_TIMEOUT, EXCHANGE_TIMEOUT, MAX_RETRANSMIT};
pub use dispatcher::{PayloadSource, RequestDispatcher};
pub use error::{ClientError, CloseReason, TransportError};
pub use keepalive::KeepAlive;
pub use message::{MessageKind, Response};
pub use observe::{
    supervise, Observation, ObservationHandle, ObservationKind, ObservationSession,
    ObservationState, Termination,
};
pub use options::{
    encode_options, EncodedOptions, OptionRecord, CONTENT_FORMAT, OBSERVE, URI_PATH, URI_QUERY,
};
pub use transport::{
    Datagram, DatagramStream, DtlsDatagram, TransportFactory, TransportMode, UdpDatagram,
};

// Callers build requests with these; no direct coap-domain import needed.
pub use coap_domain::{Method, RequestSpec};
