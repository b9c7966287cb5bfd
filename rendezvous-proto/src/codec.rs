//! JSON encoding and decoding for relay envelopes.
//!
//! Decoding separates three outcomes: a recognised [`ClientMessage`], a
//! well-formed envelope whose `type` the relay does not handle
//! ([`Decoded::Unknown`]), and a malformed payload ([`CodecError`]).
//! Unknown types are not errors so that newer clients never trip up an
//! older relay.

use serde_json::{Map, Value};

use crate::envelope::{CLIENT_KINDS, ClientMessage, ServerMessage};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload is not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(String),
    /// The payload is valid JSON but not an object.
    #[error("envelope is not a JSON object")]
    NotAnObject,
    /// The `type` field is absent or not a string.
    #[error("envelope has no string `type` field")]
    MissingType,
    /// A required field for the declared type is absent or has the wrong shape.
    #[error("invalid `{kind}` envelope: {reason}")]
    InvalidFields {
        /// Declared `type` of the envelope.
        kind: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result of decoding an inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A message the relay knows how to route.
    Message(ClientMessage),
    /// A well-formed envelope with an unrecognised `type`.
    Unknown(String),
}

/// Decodes a text frame sent by a client.
///
/// Extra fields are ignored.
///
/// # Errors
///
/// Returns [`CodecError`] if the text is not a JSON object with a string
/// `type`, or if a `join`/`signal` envelope lacks its required fields.
pub fn decode(text: &str) -> Result<Decoded, CodecError> {
    let value: Value = serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let kind = envelope_kind(&value)?.to_string();

    if !CLIENT_KINDS.contains(&kind.as_str()) {
        return Ok(Decoded::Unknown(kind));
    }

    serde_json::from_value(value)
        .map(Decoded::Message)
        .map_err(|e| CodecError::InvalidFields {
            kind,
            reason: e.to_string(),
        })
}

/// Encodes a relay-to-client message as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the message cannot be serialized.
pub fn encode(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a client-to-relay message as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the message cannot be serialized.
pub fn encode_client(msg: &ClientMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a relay-to-client message.
///
/// # Errors
///
/// Returns [`CodecError`] if the text is not a valid server envelope.
pub fn decode_server(text: &str) -> Result<ServerMessage, CodecError> {
    let value: Value = serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let kind = envelope_kind(&value)?.to_string();
    serde_json::from_value(value).map_err(|e| CodecError::InvalidFields {
        kind,
        reason: e.to_string(),
    })
}

fn envelope_kind(value: &Value) -> Result<&str, CodecError> {
    let fields: &Map<String, Value> = value.as_object().ok_or(CodecError::NotAnObject)?;
    fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)
}
