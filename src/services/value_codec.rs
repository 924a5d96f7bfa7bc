//! Buffers every accepted value shape into a single byte string.
//!
//! Streams are drained completely before anything is stored, so size limits
//! are enforced on the buffered value.

use crate::{
    models::value::ValueInput,
    services::error::{StoreError, StoreResult},
};
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;

pub async fn normalize(input: ValueInput) -> StoreResult<Bytes> {
    match input {
        ValueInput::Text(text) => Ok(Bytes::from(text)),
        ValueInput::Bytes(bytes) => Ok(bytes),
        ValueInput::View {
            buffer,
            offset,
            length,
        } => {
            let end = offset.checked_add(length).filter(|end| *end <= buffer.len());
            match end {
                Some(end) => Ok(buffer.slice(offset..end)),
                None => Err(StoreError::UnsupportedValueType(format!(
                    "view of {} bytes at offset {} exceeds buffer of {} bytes",
                    length,
                    offset,
                    buffer.len()
                ))),
            }
        }
        ValueInput::Stream(stream) => {
            let buffered = stream
                .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await?;
            Ok(buffered.freeze())
        }
        ValueInput::Blob(blob) => Ok(blob.bytes()),
        ValueInput::Null => Ok(Bytes::new()),
    }
}
