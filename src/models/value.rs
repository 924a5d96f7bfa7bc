//! Accepted shapes for a value handed to `put`.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::{fmt, io};

/// An immutable binary large object with an optional MIME type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
    content_type: Option<String>,
}

impl Blob {
    pub fn new(data: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            data: data.into(),
            content_type,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }
}

/// Every representation `put` will buffer into a byte string.
pub enum ValueInput {
    Text(String),
    Bytes(Bytes),
    /// A window of `length` bytes starting at `offset` into `buffer`.
    View {
        buffer: Bytes,
        offset: usize,
        length: usize,
    },
    /// Drained completely before the value is stored.
    Stream(BoxStream<'static, io::Result<Bytes>>),
    Blob(Blob),
    /// No value; stored as an empty object.
    Null,
}

impl fmt::Debug for ValueInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueInput::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            ValueInput::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ValueInput::View { offset, length, .. } => f
                .debug_struct("View")
                .field("offset", offset)
                .field("length", length)
                .finish(),
            ValueInput::Stream(_) => f.write_str("Stream(..)"),
            ValueInput::Blob(blob) => f.debug_tuple("Blob").field(&blob.size()).finish(),
            ValueInput::Null => f.write_str("Null"),
        }
    }
}

impl From<&str> for ValueInput {
    fn from(value: &str) -> Self {
        ValueInput::Text(value.to_string())
    }
}

impl From<String> for ValueInput {
    fn from(value: String) -> Self {
        ValueInput::Text(value)
    }
}

impl From<Bytes> for ValueInput {
    fn from(value: Bytes) -> Self {
        ValueInput::Bytes(value)
    }
}

impl From<Vec<u8>> for ValueInput {
    fn from(value: Vec<u8>) -> Self {
        ValueInput::Bytes(Bytes::from(value))
    }
}

impl From<Blob> for ValueInput {
    fn from(value: Blob) -> Self {
        ValueInput::Blob(value)
    }
}

impl<T: Into<ValueInput>> From<Option<T>> for ValueInput {
    fn from(value: Option<T>) -> Self {
        value.map_or(ValueInput::Null, Into::into)
    }
}
