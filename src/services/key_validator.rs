//! Object key validation.
//!
//! Keys must encode to fewer than [`MAX_KEY_SIZE`] UTF-8 bytes and must be
//! well-formed Unicode. Rust strings cannot hold an unpaired surrogate, so keys
//! that may carry one arrive as UTF-16 code units or raw bytes and are checked
//! while being decoded.

use crate::services::error::{Operation, StoreResult, ValidationError};
use std::fmt;
use tracing::debug;

/// Exclusive upper bound on the UTF-8 encoded key length.
pub const MAX_KEY_SIZE: usize = 1024;

/// A key as supplied by a caller, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyInput {
    Text(String),
    Utf16(Vec<u16>),
    Bytes(Vec<u8>),
}

impl From<&str> for KeyInput {
    fn from(value: &str) -> Self {
        KeyInput::Text(value.to_string())
    }
}

impl From<String> for KeyInput {
    fn from(value: String) -> Self {
        KeyInput::Text(value)
    }
}

impl From<&String> for KeyInput {
    fn from(value: &String) -> Self {
        KeyInput::Text(value.clone())
    }
}

impl From<&ObjectKey> for KeyInput {
    fn from(value: &ObjectKey) -> Self {
        KeyInput::Text(value.0.clone())
    }
}

impl From<&[u16]> for KeyInput {
    fn from(value: &[u16]) -> Self {
        KeyInput::Utf16(value.to_vec())
    }
}

impl From<Vec<u16>> for KeyInput {
    fn from(value: Vec<u16>) -> Self {
        KeyInput::Utf16(value)
    }
}

impl From<&[u8]> for KeyInput {
    fn from(value: &[u8]) -> Self {
        KeyInput::Bytes(value.to_vec())
    }
}

/// A key that passed validation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a key for `method`.
///
/// Encoding is checked before length: a key that is both malformed and too
/// long reports `IllegalUnicode`.
pub fn validate_key(method: Operation, key: impl Into<KeyInput>) -> StoreResult<ObjectKey> {
    let key = match key.into() {
        KeyInput::Text(text) => text,
        KeyInput::Utf16(units) => String::from_utf16(&units).map_err(|_| {
            debug!("{} rejected key with unpaired surrogate", method);
            ValidationError::IllegalUnicode.during(method)
        })?,
        KeyInput::Bytes(bytes) => String::from_utf8(bytes).map_err(|_| {
            debug!("{} rejected key that is not valid UTF-8", method);
            ValidationError::IllegalUnicode.during(method)
        })?,
    };

    let length = key.len();
    if length >= MAX_KEY_SIZE {
        debug!("{} rejected key of {} bytes", method, length);
        return Err(ValidationError::KeyTooLong {
            length,
            limit: MAX_KEY_SIZE,
        }
        .during(method));
    }

    Ok(ObjectKey(key))
}
