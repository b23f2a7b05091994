//! Conversions between `coap-lite` packets and the owned values the rest of
//! the crate works with.

use std::fmt;

use coap_domain::Method;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};

use crate::options::{OptionRecord, CONTENT_FORMAT, OBSERVE};

/// CoAP message type as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Con,
    Non,
    Ack,
    Rst,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Con => "CON",
            MessageKind::Non => "NON",
            MessageKind::Ack => "ACK",
            MessageKind::Rst => "RST",
        }
    }
}

impl From<MessageType> for MessageKind {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Confirmable => MessageKind::Con,
            MessageType::NonConfirmable => MessageKind::Non,
            MessageType::Acknowledgement => MessageKind::Ack,
            MessageType::Reset => MessageKind::Rst,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded response or notification.  Owns every field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Raw code byte, class in the top three bits.
    pub code: u8,
    pub kind: MessageKind,
    pub token: Vec<u8>,
    pub message_id: u16,
    pub content_format: Option<u16>,
    /// Observe sequence number, present on notifications.
    pub observe: Option<u32>,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn from_packet(packet: Packet) -> Self {
        // Content-Format is a 0-2 byte uint; wider values are not a format.
        let content_format =
            first_uint(&packet, CONTENT_FORMAT).and_then(|v| u16::try_from(v).ok());
        let observe = first_uint(&packet, OBSERVE);
        Self {
            code: u8::from(packet.header.code),
            kind: packet.header.get_type().into(),
            token: packet.get_token().to_vec(),
            message_id: packet.header.message_id,
            content_format,
            observe,
            payload: packet.payload,
        }
    }

    pub fn class(&self) -> u8 {
        self.code >> 5
    }

    pub fn detail(&self) -> u8 {
        self.code & 0x1f
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }

    /// `2.05 Content` style rendering.
    pub fn code_text(&self) -> String {
        let dotted = format!("{}.{:02}", self.class(), self.detail());
        match code_name(self.code) {
            Some(name) => format!("{dotted} {name}"),
            None => dotted,
        }
    }
}

fn code_name(code: u8) -> Option<&'static str> {
    let name = match code {
        0x41 => "Created",
        0x42 => "Deleted",
        0x43 => "Valid",
        0x44 => "Changed",
        0x45 => "Content",
        0x5f => "Continue",
        0x80 => "BadRequest",
        0x81 => "Unauthorized",
        0x82 => "BadOption",
        0x83 => "Forbidden",
        0x84 => "NotFound",
        0x85 => "MethodNotAllowed",
        0x86 => "NotAcceptable",
        0x88 => "RequestEntityIncomplete",
        0x89 => "Conflict",
        0x8c => "PreconditionFailed",
        0x8d => "RequestEntityTooLarge",
        0x8f => "UnsupportedMediaType",
        0x9d => "TooManyRequests",
        0xa0 => "InternalServerError",
        0xa1 => "NotImplemented",
        0xa2 => "BadGateway",
        0xa3 => "ServiceUnavailable",
        0xa4 => "GatewayTimeout",
        0xa5 => "ProxyingNotSupported",
        _ => return None,
    };
    Some(name)
}

/// Minimal big-endian encoding of a CoAP uint option (zero is empty).
pub(crate) fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

fn decode_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

fn first_uint(packet: &Packet, id: u16) -> Option<u32> {
    packet
        .get_option(CoapOption::from(id))
        .and_then(|values| values.front())
        .and_then(|v| decode_uint(v))
}

fn request_class(method: Method) -> MessageClass {
    MessageClass::Request(match method {
        Method::Get => RequestType::Get,
        Method::Post => RequestType::Post,
        Method::Put => RequestType::Put,
        Method::Delete => RequestType::Delete,
    })
}

/// Build a request packet: method, Uri-Path segments, then the records in
/// order.  Type, message ID and token are filled in by the connection.
pub(crate) fn build_request(method: Method, path: &str, options: &[OptionRecord]) -> Packet {
    let mut packet = Packet::new();
    packet.header.code = request_class(method);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    for record in options {
        packet.add_option(CoapOption::from(record.id), record.value.clone());
    }
    packet
}

/// An empty message (ACK, RST or ping).
pub(crate) fn empty_message(kind: MessageType, message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(kind);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;
    packet
}
