//! Frame codec.
//!
//! Text frames are JSON, binary frames are MessagePack. Both decode into the same
//! `serde_json::Value` tree before classification, so a payload yields the same
//! [`Envelope`] whichever encoding carried it.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::messages::{ClientMessage, ControlMessage, Envelope, Frame, WireFormat, CONTROL_TYPES};
use crate::error::{DecodeError, EncodeError};

/// Decode a raw frame into an envelope.
pub fn decode(frame: &Frame) -> Result<Envelope, DecodeError> {
    let value = match frame {
        Frame::Text(text) => {
            serde_json::from_str::<Value>(text).map_err(|e| DecodeError::Json(e.to_string()))?
        }
        Frame::Binary(bytes) => decode_binary(bytes)?,
    };
    classify(value)
}

/// Exactly one MessagePack value; trailing bytes are an error, as they are for JSON text.
fn decode_binary(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let value = Value::deserialize(&mut rmp_serde::Deserializer::new(&mut cursor))
        .map_err(|e| DecodeError::MessagePack(e.to_string()))?;

    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(DecodeError::MessagePack(format!(
            "{} trailing bytes after value",
            bytes.len() - consumed
        )));
    }
    Ok(value)
}

/// Classify a decoded object by its `type` discriminator.
///
/// Anything that is not a known control type is market data.
pub fn classify(value: Value) -> Result<Envelope, DecodeError> {
    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) if CONTROL_TYPES.contains(&kind) => kind.to_string(),
        _ => return Ok(Envelope::Data(value)),
    };

    serde_json::from_value::<ControlMessage>(value)
        .map(Envelope::from)
        .map_err(|e| DecodeError::Malformed {
            kind,
            reason: e.to_string(),
        })
}

pub fn encode_json<T: Serialize + ?Sized>(msg: &T) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(msg)?)
}

pub fn encode_binary<T: Serialize + ?Sized>(msg: &T) -> Result<Vec<u8>, EncodeError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Encode an outbound message in the configured wire format.
pub fn encode(msg: &ClientMessage, format: WireFormat) -> Result<Frame, EncodeError> {
    match format {
        WireFormat::Json => encode_json(msg).map(Frame::Text),
        WireFormat::MessagePack => encode_binary(msg).map(Frame::Binary),
    }
}
