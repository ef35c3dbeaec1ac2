//! Encoding of caller-supplied keys and values.
//!
//! Text encodes to its UTF-8 bytes and byte strings pass through unchanged.
//! Anything else has to opt in to [`Value::serialize`], which prefixes the
//! payload with a one-byte codec tag. The serialized layout is specific to
//! this crate and carries no cross-language guarantee.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

/// Codec used for the serialized fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// `serde_json`
    Json,
    /// `bincode`
    Bincode,
}

impl Codec {
    fn tag(self) -> u8 {
        match self {
            Codec::Json => b'J',
            Codec::Bincode => b'B',
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'J' => Some(Codec::Json),
            b'B' => Some(Codec::Bincode),
            _ => None,
        }
    }
}

/// A key or value on its way into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Raw bytes, stored as-is.
    Bytes(Bytes),
    /// UTF-8 text, stored as its bytes.
    Text(String),
    /// Tag byte followed by a serialized payload.
    Serialized(Bytes),
}

impl Value {
    /// Serializes `value` with `codec` into the tagged fallback form.
    pub fn serialize<T: Serialize + ?Sized>(value: &T, codec: Codec) -> Result<Self> {
        let mut out = vec![codec.tag()];
        match codec {
            Codec::Json => serde_json::to_writer(&mut out, value)?,
            Codec::Bincode => bincode::serialize_into(&mut out, value)?,
        }
        Ok(Value::Serialized(Bytes::from(out)))
    }

    /// Decodes bytes written by [`Value::serialize`].
    pub fn deserialize<T: DeserializeOwned>(stored: &[u8]) -> Result<T> {
        let (&tag, payload) = stored
            .split_first()
            .ok_or_else(|| Error::Serialization("empty serialized value".to_string()))?;
        match Codec::from_tag(tag) {
            Some(Codec::Json) => Ok(serde_json::from_slice(payload)?),
            Some(Codec::Bincode) => Ok(bincode::deserialize(payload)?),
            None => Err(Error::Serialization(format!("unknown codec tag {:#04x}", tag))),
        }
    }

    /// Codec of a serialized value; `None` for bytes and text.
    pub fn codec(&self) -> Option<Codec> {
        match self {
            Value::Serialized(bytes) => bytes.first().copied().and_then(Codec::from_tag),
            _ => None,
        }
    }

    /// The bytes that get stored.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Value::Bytes(bytes) | Value::Serialized(bytes) => bytes,
            Value::Text(text) => text.as_bytes(),
        }
    }

    /// Converts into the stored bytes.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Value::Bytes(bytes) | Value::Serialized(bytes) => bytes,
            Value::Text(text) => Bytes::from(text),
        }
    }

    /// Length of the stored form in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// True if the stored form is empty.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}
