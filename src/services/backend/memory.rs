use super::{BackendResult, StorageBackend};
use crate::models::object::{RawRecord, WireMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    fmt,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

#[derive(Clone)]
struct Entry {
    value: Bytes,
    metadata: WireMetadata,
}

/// In-memory, HashMap-based backend.
///
/// Intended for tests and embedding. Records are held behind a `RwLock`;
/// values are `Bytes`, so reads clone a reference count rather than the data.
/// Each critical section is a single map operation; a poisoned lock is
/// recovered.
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored bytes for `key`, bypassing the facade.
    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.read().get(key)
            .map(|e| e.value.clone())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn head(&self, key: &str) -> BackendResult<Option<RawRecord>> {
        let map = self.read();
        Ok(map.get(key).map(|e| RawRecord {
            value: None,
            metadata: Some(e.metadata.clone()),
        }))
    }

    async fn get(&self, key: &str) -> BackendResult<Option<RawRecord>> {
        let map = self.read();
        Ok(map.get(key).map(|e| RawRecord {
            value: Some(e.value.clone()),
            metadata: Some(e.metadata.clone()),
        }))
    }

    async fn put(&self, key: &str, value: Bytes, metadata: WireMetadata) -> BackendResult<RawRecord> {
        let mut map = self.write();
        map.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                metadata: metadata.clone(),
            },
        );
        Ok(RawRecord {
            value: Some(value),
            metadata: Some(metadata),
        })
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        let mut map = self.write();
        Ok(map.remove(key).is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("object_count", &self.len())
            .finish()
    }
}
