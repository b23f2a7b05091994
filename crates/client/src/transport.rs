//! Datagram sessions and the factory that dials them.
//!
//! Two transports sit behind the [`Datagram`] trait:
//! - **Plain**: a connected tokio `UdpSocket`.
//! - **Secure**: an OpenSSL DTLS 1.2 client session over that same socket.
//!
//! The engine above never needs to know which one it is talking to.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use coap_certs::{IdentityBundle, SecureIdentity};
use openssl::error::ErrorStack;
use openssl::pkey::PKey;
use openssl::ssl::{
    Ssl, SslContext, SslContextBuilder, SslContextRef, SslMethod, SslOptions, SslVerifyMode,
};
use openssl::x509::X509;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio_openssl::SslStream;

use crate::connection::{Connection, ExchangeParams};
use crate::error::ClientError;
use crate::keepalive::KeepAlive;

/// Upper bound on the DTLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a stalled handshake is re-entered so OpenSSL can retransmit
/// a flight whose DTLS timer has expired.
const HANDSHAKE_RETRY: Duration = Duration::from_millis(500);

/// Largest datagram the DTLS layer emits.
const DTLS_MTU: u32 = 1400;

/// One connected datagram session.
#[async_trait]
pub trait Datagram: Send + Sync {
    async fn send(&self, buf: &[u8]) -> io::Result<()>;

    /// Receive one datagram into `buf`, returning its length.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Plain,
    Secure,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plain UDP
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct UdpDatagram {
    socket: UdpSocket,
}

impl UdpDatagram {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Datagram for UdpDatagram {
    async fn send(&self, buf: &[u8]) -> io::Result<()> {
        self.socket.send(buf).await.map(|_| ())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }

    // The socket is released on drop.
    async fn close(&self) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DTLS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A connected UDP socket seen as a byte stream for OpenSSL.
///
/// Every read returns exactly one datagram and every write sends exactly
/// one, which is the framing DTLS records need.
#[derive(Debug)]
pub struct DatagramStream {
    socket: UdpSocket,
}

impl DatagramStream {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl AsyncRead for DatagramStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for DatagramStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

type DtlsStream = SslStream<DatagramStream>;

/// An established DTLS session, split so a pending read never holds up a
/// write.
pub struct DtlsDatagram {
    reader: Mutex<ReadHalf<DtlsStream>>,
    writer: Mutex<WriteHalf<DtlsStream>>,
}

impl DtlsDatagram {
    pub fn new(stream: DtlsStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl Datagram for DtlsDatagram {
    async fn send(&self, buf: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(buf).await?;
        writer.flush().await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.lock().await.read(buf).await? {
            // close_notify; every later read would return 0 as well.
            0 => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the DTLS session",
            )),
            n => Ok(n),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.writer.lock().await.shutdown().await {
            tracing::debug!(error = %e, "error closing DTLS session");
        }
    }
}

fn config_error(e: ErrorStack) -> ClientError {
    ClientError::SecureConfig(e.to_string())
}

/// Present `identity` during the handshake.
///
/// OpenSSL signs with RSA or with an EC key on any named curve, so whatever
/// the loader accepted is usable here.  The key must match the leaf.
fn install_identity(builder: &mut SslContextBuilder, identity: &SecureIdentity) -> Result<(), ClientError> {
    let rejected = |what: &str, e: ErrorStack| ClientError::SecureConfig(format!("{what} rejected: {e}"));

    let leaf = X509::from_der(identity.chain().leaf()).map_err(|e| rejected("client certificate", e))?;
    builder
        .set_certificate(&leaf)
        .map_err(|e| rejected("client certificate", e))?;
    for intermediate in identity.chain().iter().skip(1) {
        let cert = X509::from_der(intermediate).map_err(|e| rejected("intermediate certificate", e))?;
        builder
            .add_extra_chain_cert(cert)
            .map_err(|e| rejected("intermediate certificate", e))?;
    }

    let key = PKey::private_key_from_pkcs8(identity.key().pkcs8_der())
        .map_err(|e| rejected("client key", e))?;
    builder.set_private_key(&key).map_err(|e| rejected("client key", e))?;
    builder.check_private_key().map_err(|e| rejected("client key", e))?;
    Ok(())
}

/// Run the client handshake to completion.
///
/// OpenSSL only retransmits a lost flight when it is re-entered after its
/// timer expires, so the handshake is polled again on every retry tick.
async fn drive_handshake(stream: &mut DtlsStream) -> Result<(), openssl::ssl::Error> {
    let mut retry = tokio::time::interval(HANDSHAKE_RETRY);
    std::future::poll_fn(|cx| loop {
        if let Poll::Ready(result) = Pin::new(&mut *stream).poll_connect(cx) {
            return Poll::Ready(result);
        }
        if retry.poll_tick(cx).is_pending() {
            return Poll::Pending;
        }
    })
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fluent builder that dials a [`Connection`].
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), coap_client::ClientError> {
/// use coap_client::{KeepAlive, TransportFactory};
/// let conn = TransportFactory::new("coap.example.com:5684")
///     .secure(true)
///     .keep_alive(KeepAlive::new(std::time::Duration::from_secs(30), 10))
///     .connect()
///     .await?;
/// # Ok(()) }
/// ```
pub struct TransportFactory {
    addr: String,
    identity: Option<IdentityBundle>,
    secure: bool,
    verify_server: bool,
    server_name: Option<String>,
    keep_alive: KeepAlive,
    params: ExchangeParams,
}

impl TransportFactory {
    /// `addr` is `host:port`; IPv6 hosts go in brackets.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            identity: None,
            secure: false,
            verify_server: false,
            server_name: None,
            keep_alive: KeepAlive::disabled(),
            params: ExchangeParams::default(),
        }
    }

    /// Client certificate and trust pool.  Supplying one implies DTLS.
    pub fn identity(mut self, bundle: IdentityBundle) -> Self {
        self.identity = Some(bundle);
        self
    }

    pub fn secure(mut self, on: bool) -> Self {
        self.secure = on;
        self
    }

    /// Opt in to checking the server certificate against the trust pool.
    pub fn verify_server(mut self, on: bool) -> Self {
        self.verify_server = on;
        self
    }

    /// Name checked against the server certificate.  Defaults to the host.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn keep_alive(mut self, policy: KeepAlive) -> Self {
        self.keep_alive = policy;
        self
    }

    pub fn exchange_timeout(mut self, timeout: Duration) -> Self {
        self.params.exchange_timeout = timeout;
        self
    }

    /// Full reliability settings (retransmission schedule included).
    pub fn exchange_params(mut self, params: ExchangeParams) -> Self {
        self.params = params;
        self
    }

    pub fn mode(&self) -> TransportMode {
        if self.secure || self.identity.is_some() {
            TransportMode::Secure
        } else {
            TransportMode::Plain
        }
    }

    pub async fn connect(self) -> Result<Connection, ClientError> {
        let mode = self.mode();
        tracing::info!(addr = %self.addr, ?mode, "dialing");

        let socket = self.dial_udp().await?;
        let datagram: Arc<dyn Datagram> = match mode {
            TransportMode::Plain => Arc::new(UdpDatagram::new(socket)),
            TransportMode::Secure => {
                let context = self.dtls_context()?;
                let session = self.dtls_session(&context)?;
                Arc::new(self.handshake(socket, session).await?)
            }
        };

        let connection = Connection::open(datagram, mode, self.params);
        connection.start_keep_alive(self.keep_alive);
        Ok(connection)
    }

    fn dial_error(&self, reason: impl ToString) -> ClientError {
        ClientError::Dial {
            addr: self.addr.clone(),
            reason: reason.to_string(),
        }
    }

    async fn dial_udp(&self) -> Result<UdpSocket, ClientError> {
        let remote = tokio::net::lookup_host(&self.addr)
            .await
            .map_err(|e| self.dial_error(e))?
            .next()
            .ok_or_else(|| self.dial_error("address resolved to nothing"))?;

        let local: SocketAddr = if remote.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(local).await.map_err(|e| self.dial_error(e))?;
        socket.connect(remote).await.map_err(|e| self.dial_error(e))?;
        tracing::debug!(%remote, local = ?socket.local_addr().ok(), "udp socket connected");
        Ok(socket)
    }

    /// Name checked against the server certificate.
    fn expected_server_name(&self) -> String {
        self.server_name
            .clone()
            .unwrap_or_else(|| host_of(&self.addr).to_string())
    }

    fn dtls_context(&self) -> Result<SslContext, ClientError> {
        let mut builder = SslContext::builder(SslMethod::dtls_client()).map_err(config_error)?;
        builder.set_options(SslOptions::NO_QUERY_MTU);

        if self.verify_server {
            builder.set_verify(SslVerifyMode::PEER);
        } else {
            builder.set_verify(SslVerifyMode::NONE);
            tracing::debug!("server certificate verification relaxed");
        }

        if let Some(bundle) = &self.identity {
            for anchor in bundle.trust_pool.anchors() {
                let cert = X509::from_der(anchor).map_err(config_error)?;
                builder.cert_store_mut().add_cert(cert).map_err(config_error)?;
            }
            if let Some(identity) = &bundle.identity {
                install_identity(&mut builder, identity)?;
            }
        }
        Ok(builder.build())
    }

    fn dtls_session(&self, context: &SslContextRef) -> Result<Ssl, ClientError> {
        let mut session = Ssl::new(context).map_err(config_error)?;
        session.set_connect_state();
        session.set_mtu(DTLS_MTU).map_err(config_error)?;

        let name = self.expected_server_name();
        match name.parse::<IpAddr>() {
            Ok(ip) => session.param_mut().set_ip(ip).map_err(config_error)?,
            Err(_) => {
                session.set_hostname(&name).map_err(config_error)?;
                session.param_mut().set_host(&name).map_err(config_error)?;
            }
        }
        Ok(session)
    }

    async fn handshake(&self, socket: UdpSocket, session: Ssl) -> Result<DtlsDatagram, ClientError> {
        let mut stream = SslStream::new(session, DatagramStream::new(socket))
            .map_err(|e| self.dial_error(format!("DTLS setup failed: {e}")))?;

        tokio::time::timeout(HANDSHAKE_TIMEOUT, drive_handshake(&mut stream))
            .await
            .map_err(|_| self.dial_error("DTLS handshake timed out"))?
            .map_err(|e| self.dial_error(format!("DTLS handshake failed: {e}")))?;

        if stream.ssl().extms_support() != Some(true) {
            return Err(self.dial_error("server did not negotiate the extended master secret"));
        }

        tracing::info!(
            addr = %self.addr,
            version = stream.ssl().version_str(),
            cipher = stream.ssl().current_cipher().map(|c| c.name()),
            "DTLS session established"
        );
        Ok(DtlsDatagram::new(stream))
    }
}

/// Host part of `host:port`, without IPv6 brackets.
fn host_of(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}
