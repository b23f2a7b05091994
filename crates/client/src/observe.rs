//! Resource observation (RFC 7641) and its supervised shutdown.
//!
//! ```text
//!   Registering ──ok──▶ Active ──cancel()──▶ Cancelled
//!        │                 │
//!        └──fail──▶ Errored ◀──connection lost
//! ```
//!
//! [`supervise`] races an interrupt against connection loss on a single
//! oneshot; whichever arrives first drives one ordered shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use coap_domain::{Method, RequestSpec};
use coap_lite::CoapOption;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::connection::{fresh_token, Connection};
use crate::error::{ClientError, CloseReason};
use crate::message::{build_request, encode_uint, Response};
use crate::options::{EncodedOptions, OptionRecord};
use crate::transport::TransportMode;

const OBSERVE_REGISTER: u32 = 0;
const OBSERVE_DEREGISTER: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationState {
    Registering,
    Active,
    Cancelled,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Plain,
    Secure,
}

impl From<TransportMode> for ObservationKind {
    fn from(mode: TransportMode) -> Self {
        match mode {
            TransportMode::Plain => ObservationKind::Plain,
            TransportMode::Secure => ObservationKind::Secure,
        }
    }
}

/// What callers hold on to while a subscription runs.
#[async_trait]
pub trait ObservationHandle: Send + Sync {
    /// Deregister.  Runs at most once; later calls return `Ok(())`.
    async fn cancel(&self) -> Result<(), ClientError>;

    fn is_active(&self) -> bool;
}

/// Entry point for starting observations.
pub struct ObservationSession;

impl ObservationSession {
    /// Register an observation of `spec.path` and stream every notification
    /// into `sink`, starting with the registration response.
    ///
    /// Only GET can observe; anything else fails before the network is used.
    pub async fn register<F>(
        connection: &Connection,
        spec: &RequestSpec,
        options: &EncodedOptions,
        mut sink: F,
    ) -> Result<Observation, ClientError>
    where
        F: FnMut(Response) + Send + 'static,
    {
        if spec.method != Method::Get {
            return Err(ClientError::ObserveRequiresGet(spec.method));
        }

        let token = fresh_token();
        let records = options.without_observe();
        let mut packet = build_request(Method::Get, &spec.path, &records);
        packet.add_option(CoapOption::Observe, encode_uint(OBSERVE_REGISTER));
        packet.set_token(token.clone());

        tracing::info!(path = %spec.path, token = %hex::encode(&token), "registering observation");
        let mut queue = connection.register_observer(&token);

        let first = match connection.exchange(packet).await {
            Ok(response) => response,
            Err(e) => {
                connection.remove_observer(&token);
                tracing::warn!(error = %e, "observation registration failed");
                return Err(ClientError::SubscriptionFailed(e));
            }
        };

        if first.observe.is_none() {
            tracing::warn!(
                code = %first.code_text(),
                "server answered without Observe; no notifications will follow"
            );
        }
        sink(first);

        let delivery = tokio::spawn(async move {
            while let Some(notification) = queue.recv().await {
                sink(notification);
            }
        });

        Ok(Observation {
            connection: connection.clone(),
            kind: connection.mode().into(),
            token,
            path: spec.path.clone(),
            options: records,
            state: Mutex::new(ObservationState::Active),
            cancelled: AtomicBool::new(false),
            delivery,
        })
    }
}

/// A live subscription.  Plain and secure observations share this type.
pub struct Observation {
    connection: Connection,
    kind: ObservationKind,
    token: Vec<u8>,
    path: String,
    /// Options sent at registration, replayed on deregistration.
    options: Vec<OptionRecord>,
    state: Mutex<ObservationState>,
    cancelled: AtomicBool,
    delivery: JoinHandle<()>,
}

impl Observation {
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn kind(&self) -> ObservationKind {
        self.kind
    }

    pub fn state(&self) -> ObservationState {
        let state = *self.state.lock();
        if state == ObservationState::Active && self.connection.is_closed() {
            ObservationState::Errored
        } else {
            state
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[async_trait]
impl ObservationHandle for Observation {
    async fn cancel(&self) -> Result<(), ClientError> {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(token = %hex::encode(&self.token), "deregistering observation");
        let mut packet = build_request(Method::Get, &self.path, &self.options);
        packet.add_option(CoapOption::Observe, encode_uint(OBSERVE_DEREGISTER));
        packet.set_token(self.token.clone());

        let result = self.connection.exchange(packet).await;
        self.connection.remove_observer(&self.token);

        match result {
            Ok(_) => {
                *self.state.lock() = ObservationState::Cancelled;
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = ObservationState::Errored;
                Err(ClientError::DeregistrationFailed(e))
            }
        }
    }

    fn is_active(&self) -> bool {
        self.state() == ObservationState::Active
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        self.delivery.abort();
    }
}

/// How a supervised observation ended when it ended cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Interrupted(String),
}

impl From<Termination> for ClientError {
    fn from(termination: Termination) -> Self {
        match termination {
            Termination::Interrupted(reason) => ClientError::ObservationTerminated { reason },
        }
    }
}

enum Trigger {
    Interrupt(String),
    Lost(CloseReason),
}

/// Single-use rendezvous: the first producer to offer wins.
#[derive(Clone)]
struct Rendezvous(Arc<Mutex<Option<oneshot::Sender<Trigger>>>>);

impl Rendezvous {
    fn offer(&self, trigger: Trigger) {
        if let Some(tx) = self.0.lock().take() {
            let _ = tx.send(trigger);
        }
    }
}

/// Hold `observation` open until `interrupt` resolves or the connection is
/// lost, then deregister exactly once and report.
///
/// An interrupt yields `Ok(Termination::Interrupted)` unless deregistration
/// fails.  Connection loss yields `Errored` or `KeepAliveExhausted`.
pub async fn supervise<I>(observation: Observation, interrupt: I) -> Result<Termination, ClientError>
where
    I: Future<Output = String> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let rendezvous = Rendezvous(Arc::new(Mutex::new(Some(tx))));

    let on_interrupt = {
        let rendezvous = rendezvous.clone();
        tokio::spawn(async move {
            let reason = interrupt.await;
            rendezvous.offer(Trigger::Interrupt(reason));
        })
    };
    let on_loss = {
        let rendezvous = rendezvous.clone();
        let connection = observation.connection.clone();
        tokio::spawn(async move {
            let reason = connection.closed().await;
            rendezvous.offer(Trigger::Lost(reason));
        })
    };
    drop(rendezvous);

    let trigger = rx
        .await
        .unwrap_or_else(|_| Trigger::Interrupt("supervisor abandoned".into()));
    on_interrupt.abort();
    on_loss.abort();

    let deregistered = observation.cancel().await;

    match trigger {
        Trigger::Interrupt(reason) => {
            deregistered?;
            tracing::info!(%reason, "observation terminated");
            Ok(Termination::Interrupted(reason))
        }
        Trigger::Lost(reason) => {
            if let Err(e) = deregistered {
                tracing::debug!(error = %e, "deregistration skipped on a lost connection");
            }
            Err(ClientError::from_close(reason))
        }
    }
}
