//! One-shot request/response exchanges.

use std::io::{Cursor, Read, Seek, SeekFrom};

use coap_domain::{Method, RequestSpec};
use coap_lite::CoapOption;

use crate::connection::Connection;
use crate::error::ClientError;
use crate::message::{build_request, encode_uint, Response};
use crate::options::{EncodedOptions, OptionRecord};

/// A request body that can be rewound to its start.
pub trait PayloadSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> PayloadSource for T {}

pub struct RequestDispatcher<'a> {
    connection: &'a Connection,
}

impl<'a> RequestDispatcher<'a> {
    pub fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// Send one confirmable request and wait for its response.
    ///
    /// GET and DELETE never carry a body.  PUT and POST read `payload` from
    /// its start and attach `content_format`.  There is no retry here beyond
    /// the engine's retransmissions.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        content_format: u16,
        payload: Option<&mut dyn PayloadSource>,
        options: &[OptionRecord],
    ) -> Result<Response, ClientError> {
        let mut packet = build_request(method, path, options);

        if method.carries_payload() {
            let body = match payload {
                Some(source) => read_payload(source)?,
                None => Vec::new(),
            };
            packet.clear_option(CoapOption::ContentFormat);
            packet.add_option(
                CoapOption::ContentFormat,
                encode_uint(u32::from(content_format)),
            );
            packet.payload = body;
        }

        tracing::debug!(
            %method,
            path,
            options = options.len(),
            payload_bytes = packet.payload.len(),
            "sending request"
        );

        let response = self
            .connection
            .exchange(packet)
            .await
            .map_err(ClientError::from_exchange)?;

        tracing::debug!(code = %response.code_text(), "response received");
        Ok(response)
    }

    /// [`send`](Self::send) driven by a resolved [`RequestSpec`].
    pub async fn dispatch(
        &self,
        spec: &RequestSpec,
        options: &EncodedOptions,
    ) -> Result<Response, ClientError> {
        let mut body = Cursor::new(spec.payload.as_slice());
        self.send(
            spec.method,
            &spec.path,
            spec.content_format,
            Some(&mut body),
            &options.records,
        )
        .await
    }
}

fn read_payload(source: &mut dyn PayloadSource) -> Result<Vec<u8>, ClientError> {
    source.seek(SeekFrom::Start(0)).map_err(ClientError::Payload)?;
    let mut body = Vec::new();
    source.read_to_end(&mut body).map_err(ClientError::Payload)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use coap_lite::{MessageType, Packet};

    use super::*;
    use crate::connection::{ExchangeParams, EXCHANGE_TIMEOUT};
    use crate::error::TransportError;
    use crate::message::empty_message;
    use crate::options::{encode_options, CONTENT_FORMAT};
    use crate::testing::{mock_pair, response_to, MockPeer};
    use crate::transport::{Datagram, TransportMode};

    fn open(datagram: Arc<dyn Datagram>) -> Connection {
        Connection::open(datagram, TransportMode::Plain, ExchangeParams::default())
    }

    /// Answer the next request with a piggybacked 2.04 and hand it back.
    fn answer_once(mut peer: MockPeer) -> tokio::task::JoinHandle<(MockPeer, Packet)> {
        tokio::spawn(async move {
            let request = peer.next_packet().await;
            peer.inject(&response_to(&request, MessageType::Acknowledgement, 0x44, b""));
            (peer, request)
        })
    }

    #[tokio::test]
    async fn put_carries_payload_and_content_format() {
        let (datagram, peer) = mock_pair();
        let conn = open(datagram);
        let server = answer_once(peer);

        let spec = RequestSpec::new(Method::Put, "/lamp").payload("on").content_format(0);
        let options = encode_options(&[], None, false).unwrap();
        let response = RequestDispatcher::new(&conn)
            .dispatch(&spec, &options)
            .await
            .unwrap();
        assert_eq!(response.code_text(), "2.04 Changed");

        let (_peer, request) = server.await.unwrap();
        assert_eq!(request.payload, b"on");
        assert_eq!(request.header.get_type(), MessageType::Confirmable);
        let cf = request
            .get_option(CoapOption::from(CONTENT_FORMAT))
            .and_then(|v| v.front().cloned());
        assert_eq!(cf, Some(Vec::new()), "content format 0 encodes as empty");
    }

    #[tokio::test]
    async fn get_drops_payload() {
        let (datagram, peer) = mock_pair();
        let conn = open(datagram);
        let server = answer_once(peer);

        let mut body = Cursor::new(b"ignored".to_vec());
        RequestDispatcher::new(&conn)
            .send(Method::Get, "/a", 50, Some(&mut body), &[])
            .await
            .unwrap();

        let (_peer, request) = server.await.unwrap();
        assert!(request.payload.is_empty());
        assert!(request.get_option(CoapOption::ContentFormat).is_none());
    }

    #[tokio::test]
    async fn payload_is_read_from_the_start() {
        let (datagram, peer) = mock_pair();
        let conn = open(datagram);
        let server = answer_once(peer);

        let mut body = Cursor::new(b"full body".to_vec());
        body.set_position(5);
        RequestDispatcher::new(&conn)
            .send(Method::Post, "/", 50, Some(&mut body), &[])
            .await
            .unwrap();

        let (_peer, request) = server.await.unwrap();
        assert_eq!(request.payload, b"full body");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_nothing_pending() {
        let (datagram, mut peer) = mock_pair();
        let conn = open(datagram);

        let started = tokio::time::Instant::now();
        let err = RequestDispatcher::new(&conn)
            .send(Method::Get, "/silent", 50, None, &[])
            .await
            .unwrap_err();
        assert!(
            matches!(err, ClientError::ExchangeFailed(TransportError::Timeout(_))),
            "got {err:?}"
        );
        assert!(started.elapsed() >= EXCHANGE_TIMEOUT);
        assert_eq!(conn.pending_exchanges(), 0);

        // Original send plus four retransmissions (2 + 4 + 8 + 16 s).
        assert_eq!(peer.drain_sent(), 5);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(peer.drain_sent(), 0, "nothing may be sent after the deadline");
    }

    #[tokio::test(start_paused = true)]
    async fn retransmits_until_acknowledged() {
        let (datagram, mut peer) = mock_pair();
        let conn = open(datagram);

        let server = tokio::spawn(async move {
            let first = peer.next_packet().await;
            let second = peer.next_packet().await;
            assert_eq!(first.header.message_id, second.header.message_id);
            assert_eq!(first.get_token(), second.get_token());
            peer.inject(&response_to(&second, MessageType::Acknowledgement, 0x45, b"ok"));
            peer
        });

        let response = RequestDispatcher::new(&conn)
            .send(Method::Get, "/flaky", 50, None, &[])
            .await
            .unwrap();
        assert_eq!(response.payload, b"ok");
        let mut peer = server.await.unwrap();
        assert_eq!(peer.drain_sent(), 0);
    }

    #[tokio::test]
    async fn reset_is_an_exchange_failure() {
        let (datagram, mut peer) = mock_pair();
        let conn = open(datagram);

        let _server = tokio::spawn(async move {
            let request = peer.next_packet().await;
            peer.inject(&empty_message(MessageType::Reset, request.header.message_id));
            peer
        });

        let err = RequestDispatcher::new(&conn)
            .send(Method::Delete, "/gone", 50, None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ExchangeFailed(TransportError::Reset)));
    }
}
