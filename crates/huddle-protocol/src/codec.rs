//! Codec for encoding and decoding Huddle messages.
//!
//! Text WebSocket messages carry JSON. Binary messages carry MessagePack with
//! named fields, which browsers can opt into with `?format=msgpack`.

use bytes::Bytes;
use thiserror::Error;

use crate::events::ClientEvent;
use crate::frames::ServerFrame;

/// Maximum encoded message size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encoding used for outbound frames on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON in text messages.
    #[default]
    Json,
    /// MessagePack in binary messages.
    MessagePack,
}

impl WireFormat {
    /// Parse a `format` query value. Unknown values fall back to JSON.
    #[must_use]
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("msgpack") | Some("messagepack") => WireFormat::MessagePack,
            _ => WireFormat::Json,
        }
    }
}

/// An encoded outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Send as a text message.
    Text(String),
    /// Send as a binary message.
    Binary(Bytes),
}

impl Encoded {
    /// Size of the encoded payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(s) => s.len(),
            Encoded::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a server frame in the given format.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &ServerFrame, format: WireFormat) -> Result<Encoded, ProtocolError> {
    let encoded = match format {
        WireFormat::Json => Encoded::Text(serde_json::to_string(frame)?),
        WireFormat::MessagePack => Encoded::Binary(Bytes::from(rmp_serde::to_vec_named(frame)?)),
    };

    if encoded.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(encoded.len()));
    }

    Ok(encoded)
}

/// Decode a client event from a JSON text message.
///
/// # Errors
///
/// Returns an error if the message is too large or not a known event.
pub fn decode_text(text: &str) -> Result<ClientEvent, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Decode a client event from a MessagePack binary message.
///
/// # Errors
///
/// Returns an error if the message is too large or not a known event.
pub fn decode_binary(data: &[u8]) -> Result<ClientEvent, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }
    Ok(rmp_serde::from_slice(data)?)
}

/// Decode a server frame from a MessagePack binary message.
///
/// # Errors
///
/// Returns an error if the data is not a valid frame.
pub fn decode_frame_binary(data: &[u8]) -> Result<ServerFrame, ProtocolError> {
    Ok(rmp_serde::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Estimate;
    use crate::frames::{Role, WorkItem};

    #[test]
    fn test_json_encoding_is_text() {
        let encoded = encode(&ServerFrame::Timer(3), WireFormat::Json).unwrap();
        assert_eq!(encoded, Encoded::Text(r#"{"type":"timer","data":3}"#.to_string()));
    }

    #[test]
    fn test_msgpack_frame_decodes() {
        let frame = ServerFrame::CurrentTicket(WorkItem {
            id: 4,
            board_id: 1,
            key: "PROJ-4".into(),
            summary: Some("Login page".into()),
            description: None,
            is_estimated: false,
            final_estimation: None,
        });

        let Encoded::Binary(data) = encode(&frame, WireFormat::MessagePack).unwrap() else {
            panic!("expected binary encoding");
        };
        assert_eq!(decode_frame_binary(&data).unwrap(), frame);

        let role = ServerFrame::Role(Role::Spectator);
        let Encoded::Binary(data) = encode(&role, WireFormat::MessagePack).unwrap() else {
            panic!("expected binary encoding");
        };
        assert_eq!(decode_frame_binary(&data).unwrap(), role);
    }

    #[test]
    fn test_msgpack_event_decodes() {
        let event = ClientEvent::CardSelected { card: Estimate(5) };
        let data = rmp_serde::to_vec_named(&event).unwrap();
        assert_eq!(decode_binary(&data).unwrap(), event);
    }

    #[test]
    fn test_decode_text_malformed() {
        assert!(matches!(
            decode_text("not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_message_too_large() {
        let huge = " ".repeat(MAX_MESSAGE_SIZE + 1);
        match decode_text(&huge) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_format_from_query() {
        assert_eq!(WireFormat::from_query(Some("msgpack")), WireFormat::MessagePack);
        assert_eq!(WireFormat::from_query(Some("xml")), WireFormat::Json);
        assert_eq!(WireFormat::from_query(None), WireFormat::Json);
    }
}
