//! The CoAP session engine: one datagram session, a receive loop, and the
//! tables that route inbound messages to whoever is waiting for them.
//!
//! ```text
//!   exchange() ──send──▶ Datagram ──▶ peer
//!       ▲                                │
//!       │ oneshot          receive loop ◀┘
//!       └──────── exchanges[token] ◀─────┤
//!   delivery task ◀── observers[token] ◀─┘
//! ```
//!
//! Confirmable requests are retransmitted with exponential backoff until
//! acknowledged, inside one overall exchange deadline.  When the connection
//! fails, every waiter is woken with the recorded [`CloseReason`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coap_lite::{MessageClass, MessageType, Packet};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CloseReason, TransportError};
use crate::keepalive::{self, KeepAlive};
use crate::message::{empty_message, Response};
use crate::transport::{Datagram, TransportMode};

/// Initial retransmission timeout (RFC 7252 ACK_TIMEOUT).
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);
/// Retransmissions before the engine stops resending.
pub const MAX_RETRANSMIT: u32 = 4;
/// Upper bound on one request/response exchange.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(60);

const TOKEN_LEN: usize = 8;
const RECV_BUFFER: usize = 64 * 1024;

/// Reliability settings for confirmable exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeParams {
    pub ack_timeout: Duration,
    pub max_retransmit: u32,
    pub exchange_timeout: Duration,
}

impl Default for ExchangeParams {
    fn default() -> Self {
        Self {
            ack_timeout: ACK_TIMEOUT,
            max_retransmit: MAX_RETRANSMIT,
            exchange_timeout: EXCHANGE_TIMEOUT,
        }
    }
}

struct Pending {
    reply: oneshot::Sender<Result<Response, TransportError>>,
    message_id: u16,
    /// An empty ACK arrived; the response will come separately.
    acked: bool,
}

pub(crate) struct Inner {
    datagram: Arc<dyn Datagram>,
    mode: TransportMode,
    params: ExchangeParams,
    exchanges: Mutex<HashMap<Vec<u8>, Pending>>,
    observers: Mutex<HashMap<Vec<u8>, mpsc::UnboundedSender<Response>>>,
    next_message_id: AtomicU16,
    /// Bumped on every inbound datagram; the keep-alive monitor compares it
    /// between ticks.
    activity: AtomicU64,
    closed: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
}

/// Aborts the background tasks once the last [`Connection`] clone is gone.
struct TaskGuard(Mutex<Vec<JoinHandle<()>>>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for task in self.0.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// An established CoAP session over plain UDP or DTLS.
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
    tasks: Arc<TaskGuard>,
}

impl Connection {
    /// Start the engine over an already-established datagram session.
    pub fn open(datagram: Arc<dyn Datagram>, mode: TransportMode, params: ExchangeParams) -> Self {
        let initial_mid = u16::from_be_bytes(random_bytes::<2>());
        let inner = Arc::new(Inner {
            datagram,
            mode,
            params,
            exchanges: Mutex::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
            next_message_id: AtomicU16::new(initial_mid),
            activity: AtomicU64::new(0),
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
        });

        let reader = tokio::spawn(receive_loop(inner.clone()));
        tracing::debug!(?mode, "connection engine started");

        Self {
            inner,
            tasks: Arc::new(TaskGuard(Mutex::new(vec![reader]))),
        }
    }

    /// Attach a keep-alive monitor.  A disabled policy is ignored.
    pub fn start_keep_alive(&self, policy: KeepAlive) {
        if !policy.is_enabled() {
            return;
        }
        tracing::debug!(
            interval_secs = policy.interval.as_secs(),
            max_retries = policy.max_retries,
            "keep-alive enabled"
        );
        let task = tokio::spawn(keepalive::monitor(self.inner.clone(), policy));
        self.tasks.0.lock().push(task);
    }

    pub fn mode(&self) -> TransportMode {
        self.inner.mode
    }

    pub fn params(&self) -> ExchangeParams {
        self.inner.params
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.lock().clone()
    }

    /// Resolves once the connection has failed or been closed.
    pub async fn closed(&self) -> CloseReason {
        self.inner.closed.cancelled().await;
        self.close_reason().unwrap_or(CloseReason::Local)
    }

    /// Close the session and release the underlying socket.
    pub async fn close(&self) {
        self.inner.fail(CloseReason::Local);
        self.inner.datagram.close().await;
    }

    /// Run one confirmable exchange and wait for its response.
    ///
    /// A packet without a token gets a fresh one.  The pending entry is
    /// removed on every outcome, so nothing is retransmitted afterwards.
    pub(crate) async fn exchange(&self, mut packet: Packet) -> Result<Response, TransportError> {
        self.inner.ensure_open()?;

        if packet.get_token().is_empty() {
            packet.set_token(fresh_token());
        }
        let token = packet.get_token().to_vec();
        let message_id = self.inner.next_message_id();
        packet.header.message_id = message_id;
        packet.header.set_type(MessageType::Confirmable);
        let bytes = packet
            .to_bytes()
            .map_err(|e| TransportError::Codec(e.to_string()))?;

        let (reply, rx) = oneshot::channel();
        self.inner.exchanges.lock().insert(
            token.clone(),
            Pending {
                reply,
                message_id,
                acked: false,
            },
        );
        let _pending = PendingGuard {
            inner: &self.inner,
            token: &token,
        };

        let deadline = self.inner.params.exchange_timeout;
        match tokio::time::timeout(deadline, self.inner.transmit(&bytes, &token, rx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(token = %hex::encode(&token), "exchange timed out");
                Err(TransportError::Timeout(deadline))
            }
        }
    }

    /// Route responses carrying `token` to a queue once no exchange claims them.
    pub(crate) fn register_observer(&self, token: &[u8]) -> mpsc::UnboundedReceiver<Response> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.observers.lock().insert(token.to_vec(), tx);
        rx
    }

    pub(crate) fn remove_observer(&self, token: &[u8]) {
        self.inner.observers.lock().remove(token);
    }

    #[cfg(test)]
    pub(crate) fn pending_exchanges(&self) -> usize {
        self.inner.exchanges.lock().len()
    }
}

struct PendingGuard<'a> {
    inner: &'a Inner,
    token: &'a [u8],
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.exchanges.lock().remove(self.token);
    }
}

impl Inner {
    fn next_message_id(&self) -> u16 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn activity(&self) -> u64 {
        self.activity.load(Ordering::Relaxed)
    }

    pub(crate) fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match self.close_reason.lock().clone() {
            Some(reason) => Err(TransportError::Closed(reason)),
            None => Ok(()),
        }
    }

    fn closed_error(&self) -> TransportError {
        TransportError::Closed(self.close_reason.lock().clone().unwrap_or(CloseReason::Local))
    }

    /// Record `reason` (first one wins) and wake every waiter.
    pub(crate) fn fail(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.clone());
        }
        match &reason {
            CloseReason::Local => tracing::debug!("connection closed"),
            other => tracing::warn!(reason = %other, "connection failed"),
        }

        let pending: Vec<Pending> = self.exchanges.lock().drain().map(|(_, p)| p).collect();
        for p in pending {
            let _ = p.reply.send(Err(TransportError::Closed(reason.clone())));
        }
        // Dropping the senders ends every delivery task.
        self.observers.lock().clear();
        self.closed.cancel();
    }

    async fn transmit(
        &self,
        bytes: &[u8],
        token: &[u8],
        mut rx: oneshot::Receiver<Result<Response, TransportError>>,
    ) -> Result<Response, TransportError> {
        let mut wait = self.params.ack_timeout;
        let mut retransmits = 0u32;
        self.datagram.send(bytes).await?;

        loop {
            tokio::select! {
                reply = &mut rx => return reply.unwrap_or_else(|_| Err(self.closed_error())),
                _ = tokio::time::sleep(wait) => {}
            }

            if self.is_acked(token) || retransmits == self.params.max_retransmit {
                return rx.await.unwrap_or_else(|_| Err(self.closed_error()));
            }

            retransmits += 1;
            wait *= 2;
            tracing::debug!(token = %hex::encode(token), retransmits, "retransmitting");
            self.datagram.send(bytes).await?;
        }
    }

    fn is_acked(&self, token: &[u8]) -> bool {
        self.exchanges.lock().get(token).is_some_and(|p| p.acked)
    }

    /// Fire-and-forget send of a packet built by the engine itself.
    async fn send_packet(&self, packet: &Packet) {
        let bytes = match packet.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode control message");
                return;
            }
        };
        if let Err(e) = self.datagram.send(&bytes).await {
            tracing::debug!(error = %e, "failed to send control message");
        }
    }

    /// CoAP ping: an empty confirmable message.  Any reply counts as activity.
    pub(crate) async fn send_ping(&self) {
        let ping = empty_message(MessageType::Confirmable, self.next_message_id());
        self.send_packet(&ping).await;
    }

    async fn handle_inbound(&self, packet: Packet) {
        let message_id = packet.header.message_id;
        let kind = packet.header.get_type();
        let code = packet.header.code;

        match (kind, code) {
            (MessageType::Reset, _) => self.on_reset(message_id),
            (MessageType::Acknowledgement, MessageClass::Empty) => self.on_empty_ack(message_id),
            (MessageType::Acknowledgement, _) => self.deliver(packet, false).await,
            (MessageType::Confirmable, MessageClass::Empty) => {
                // Ping from the peer: answer with RST.
                self.send_packet(&empty_message(MessageType::Reset, message_id))
                    .await;
            }
            (_, MessageClass::Request(_)) => {
                tracing::debug!(message_id, "rejecting request from server");
                if kind == MessageType::Confirmable {
                    self.send_packet(&empty_message(MessageType::Reset, message_id))
                        .await;
                }
            }
            (MessageType::NonConfirmable, MessageClass::Empty) => {}
            (_, _) => {
                let confirmable = kind == MessageType::Confirmable;
                self.deliver(packet, confirmable).await;
            }
        }
    }

    fn on_reset(&self, message_id: u16) {
        let mut exchanges = self.exchanges.lock();
        let token = exchanges
            .iter()
            .find(|(_, p)| p.message_id == message_id)
            .map(|(token, _)| token.clone());
        if let Some(p) = token.and_then(|t| exchanges.remove(&t)) {
            let _ = p.reply.send(Err(TransportError::Reset));
        }
    }

    fn on_empty_ack(&self, message_id: u16) {
        if let Some(p) = self
            .exchanges
            .lock()
            .values_mut()
            .find(|p| p.message_id == message_id)
        {
            p.acked = true;
        }
    }

    async fn deliver(&self, packet: Packet, confirmable: bool) {
        let message_id = packet.header.message_id;
        let response = Response::from_packet(packet);

        let exchange = self.exchanges.lock().remove(&response.token);
        let observer = match exchange {
            Some(_) => None,
            None => self.observers.lock().get(&response.token).cloned(),
        };

        if exchange.is_none() && observer.is_none() {
            tracing::debug!(
                token = %hex::encode(&response.token),
                message_id,
                "response for unknown token"
            );
            if confirmable {
                self.send_packet(&empty_message(MessageType::Reset, message_id))
                    .await;
            }
            return;
        }

        if confirmable {
            self.send_packet(&empty_message(MessageType::Acknowledgement, message_id))
                .await;
        }

        if let Some(p) = exchange {
            let _ = p.reply.send(Ok(response));
        } else if let Some(tx) = observer {
            let token = response.token.clone();
            if tx.send(response).is_err() {
                self.observers.lock().remove(&token);
            }
        }
    }
}

async fn receive_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let received = tokio::select! {
            _ = inner.closed.cancelled() => return,
            r = inner.datagram.recv(&mut buf) => r,
        };

        let n = match received {
            Ok(n) => n,
            Err(e) => {
                inner.fail(CloseReason::ReceiveFailed(e.to_string()));
                return;
            }
        };
        inner.activity.fetch_add(1, Ordering::Relaxed);

        match Packet::from_bytes(&buf[..n]) {
            Ok(packet) => inner.handle_inbound(packet).await,
            Err(e) => tracing::debug!(bytes = n, error = %e, "dropping undecodable datagram"),
        }
    }
}

pub(crate) fn fresh_token() -> Vec<u8> {
    random_bytes::<TOKEN_LEN>().to_vec()
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..N]);
    out
}
