//! In-memory datagram pair for engine tests.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use coap_lite::{MessageClass, MessageType, Packet};
use tokio::sync::mpsc;

use crate::transport::Datagram;

pub(crate) struct MockDatagram {
    sent: mpsc::UnboundedSender<Vec<u8>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl Datagram for MockDatagram {
    async fn send(&self, buf: &[u8]) -> io::Result<()> {
        let _ = self.sent.send(buf.to_vec());
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.lock().await.recv().await {
            Some(datagram) => {
                buf[..datagram.len()].copy_from_slice(&datagram);
                Ok(datagram.len())
            }
            None => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "peer gone")),
        }
    }

    async fn close(&self) {}
}

/// The far side of a [`MockDatagram`].  Dropping it makes the client's
/// receive fail.
pub(crate) struct MockPeer {
    sent: mpsc::UnboundedReceiver<Vec<u8>>,
    inject: mpsc::UnboundedSender<Vec<u8>>,
}

impl MockPeer {
    pub(crate) async fn next_packet(&mut self) -> Packet {
        let bytes = self.sent.recv().await.expect("client side dropped");
        Packet::from_bytes(&bytes).expect("client sent undecodable datagram")
    }

    pub(crate) fn try_next_packet(&mut self) -> Option<Packet> {
        let bytes = self.sent.try_recv().ok()?;
        Some(Packet::from_bytes(&bytes).expect("client sent undecodable datagram"))
    }

    pub(crate) fn drain_sent(&mut self) -> usize {
        let mut count = 0;
        while self.sent.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    pub(crate) fn inject(&self, packet: &Packet) {
        let _ = self.inject.send(packet.to_bytes().expect("encodable test packet"));
    }
}

pub(crate) fn mock_pair() -> (Arc<dyn Datagram>, MockPeer) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (inject_tx, inject_rx) = mpsc::unbounded_channel();
    let datagram = MockDatagram {
        sent: sent_tx,
        inbound: tokio::sync::Mutex::new(inject_rx),
    };
    (
        Arc::new(datagram),
        MockPeer {
            sent: sent_rx,
            inject: inject_tx,
        },
    )
}

/// A response echoing the request's message ID and token.
pub(crate) fn response_to(request: &Packet, kind: MessageType, code: u8, payload: &[u8]) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(kind);
    packet.header.code = MessageClass::from(code);
    packet.header.message_id = request.header.message_id;
    packet.set_token(request.get_token().to_vec());
    packet.payload = payload.to_vec();
    packet
}
