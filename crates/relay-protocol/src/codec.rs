//! Wire encoding of messages.
//!
//! [`JsonCodec`] writes a message as a JSON object whose `content` carries a
//! `performative` discriminant plus exactly the fields that performative
//! defines. Decoding checks the discriminant and field set before handing the
//! value to serde, so an unknown performative or a stray field is reported
//! precisely instead of as a generic shape mismatch.

use serde_json::Value;

use crate::errors::CodecError;
use crate::message::{Content, Message, Performative};

/// Converts messages of protocol `C` to bytes and back.
pub trait Codec<C: Content> {
    /// Encode a consistent message.
    fn encode(&self, msg: &Message<C>) -> Result<Vec<u8>, CodecError>;

    /// Decode and check a message.
    fn decode(&self, bytes: &[u8]) -> Result<Message<C>, CodecError>;
}

/// JSON codec for any [`Content`].
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl<C: Content> Codec<C> for JsonCodec {
    fn encode(&self, msg: &Message<C>) -> Result<Vec<u8>, CodecError> {
        msg.check_consistency()?;
        Ok(serde_json::to_vec(msg)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message<C>, CodecError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
        check_content_shape::<C>(&value)?;
        let msg: Message<C> =
            serde_json::from_value(value).map_err(|e| CodecError::Malformed(e.to_string()))?;
        msg.check_consistency()?;
        Ok(msg)
    }
}

fn check_content_shape<C: Content>(value: &Value) -> Result<(), CodecError> {
    let content = value
        .get("content")
        .and_then(Value::as_object)
        .ok_or_else(|| CodecError::Malformed("missing content object".into()))?;
    let name = content
        .get("performative")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingPerformative)?;
    let performative = C::Performative::parse(name)
        .ok_or_else(|| CodecError::UnknownPerformative(name.to_owned()))?;
    let schema = performative.schema();

    if let Some(field) = content
        .keys()
        .find(|k| k.as_str() != "performative" && !schema.defines(k.as_str()))
    {
        return Err(CodecError::UnexpectedField {
            performative: performative.as_str(),
            field: field.clone(),
        });
    }
    if let Some(field) = schema.required.iter().find(|f| !content.contains_key(**f)) {
        return Err(CodecError::MissingField {
            performative: performative.as_str(),
            field: *field,
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
