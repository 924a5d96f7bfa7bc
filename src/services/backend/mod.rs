//! Byte-storage backends the facade sits in front of.
//!
//! A backend stores opaque bytes plus wire metadata by raw key. It knows
//! nothing about validation or conditional requests; the facade calls
//! `head` before every dependent `get`/`put`, and offers no atomicity between
//! the two calls.

use crate::models::object::{RawRecord, WireMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("stored metadata is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Raw key/value storage with metadata.
///
/// Implementations must be safe to share across tasks. Concurrent `put`s to
/// the same key may race; last writer wins.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Metadata for `key` without its value.
    async fn head(&self, key: &str) -> BackendResult<Option<RawRecord>>;

    /// Value and metadata for `key`.
    async fn get(&self, key: &str) -> BackendResult<Option<RawRecord>>;

    /// Replace whatever is stored at `key`.
    async fn put(&self, key: &str, value: Bytes, metadata: WireMetadata) -> BackendResult<RawRecord>;

    /// Remove `key`. Returns `true` if something was stored there.
    async fn delete(&self, key: &str) -> BackendResult<bool>;

    /// Cheap readiness probe.
    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Name used in logs and readiness reports.
    fn name(&self) -> &'static str;
}
