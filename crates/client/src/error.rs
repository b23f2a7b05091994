use std::fmt;
use std::time::Duration;

use coap_certs::CertError;
use coap_domain::Method;

/// Why a connection stopped.  Recorded once and handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The keep-alive monitor sent this many unanswered pings.
    KeepAliveExhausted(u32),
    ReceiveFailed(String),
    /// Closed by this side.
    Local,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::KeepAliveExhausted(probes) => {
                write!(f, "keep-alive exhausted after {probes} unanswered pings")
            }
            CloseReason::ReceiveFailed(cause) => write!(f, "receive failed: {cause}"),
            CloseReason::Local => f.write_str("closed locally"),
        }
    }
}

/// Failures of a single exchange on an established connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("datagram I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CoAP codec error: {0}")]
    Codec(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("peer reset the exchange")]
    Reset,

    #[error("connection closed: {0}")]
    Closed(CloseReason),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid option `{entry}`, expected <id>,<value>")]
    InvalidOptionFormat { entry: String },

    #[error("invalid hex value in option `{entry}`: {source}")]
    InvalidOptionValue {
        entry: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("observe is only supported with GET, not {0}")]
    ObserveRequiresGet(Method),

    #[error("subscription failed: {0}")]
    SubscriptionFailed(#[source] TransportError),

    #[error("exchange failed: {0}")]
    ExchangeFailed(#[source] TransportError),

    #[error("keep-alive exhausted after {probes} unanswered pings")]
    KeepAliveExhausted { probes: u32 },

    /// Expected end of an observation, reported rather than treated as a failure.
    #[error("observation terminated: {reason}")]
    ObservationTerminated { reason: String },

    #[error("deregistration failed: {0}")]
    DeregistrationFailed(#[source] TransportError),

    #[error("observation errored: {0}")]
    Errored(#[source] TransportError),

    #[error("cannot reach {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("invalid DTLS configuration: {0}")]
    SecureConfig(String),

    #[error(transparent)]
    Certs(#[from] CertError),

    #[error("reading payload: {0}")]
    Payload(#[source] std::io::Error),
}

impl ClientError {
    /// Map a failed request exchange, surfacing keep-alive exhaustion on its own.
    pub(crate) fn from_exchange(err: TransportError) -> Self {
        match err {
            TransportError::Closed(CloseReason::KeepAliveExhausted(probes)) => {
                ClientError::KeepAliveExhausted { probes }
            }
            other => ClientError::ExchangeFailed(other),
        }
    }

    /// Map the loss of a connection under a live observation.
    pub(crate) fn from_close(reason: CloseReason) -> Self {
        match reason {
            CloseReason::KeepAliveExhausted(probes) => ClientError::KeepAliveExhausted { probes },
            other => ClientError::Errored(TransportError::Closed(other)),
        }
    }
}
