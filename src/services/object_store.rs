//! ObjectStore — validation and conditional gating in front of a
//! [`StorageBackend`].
//!
//! Every `get` and `put` reads the current metadata with a backend `head`
//! first, evaluates the caller's `onlyIf` predicate against it and only then
//! performs the dependent read or write. The two backend calls are not atomic:
//! the conditional check is read-then-act, and concurrent writers to the same
//! key race at the backend.

use crate::{
    models::{
        object::{GetOutcome, ObjectBody, ObjectMetadata, ResolvedRange},
        options::{GetOptions, Md5, PutOptions, RangeOptions},
        value::ValueInput,
    },
    services::{
        backend::StorageBackend,
        conditional::{evaluate, resolve_only_if},
        error::{Operation, StoreError, StoreResult, ValidationError},
        key_validator::{KeyInput, ObjectKey, validate_key},
        metadata_codec::{
            encode_object_metadata, parse_http_metadata, parse_object_metadata,
            validate_http_metadata,
        },
        value_codec,
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Largest accepted value: 5 GB minus 5 MB.
pub const MAX_VALUE_SIZE: u64 = 5 * 1_000 * 1_000 * 1_000 - 5 * 1_000 * 1_000;

/// The facade. Stateless apart from the injected backend, so clones are cheap
/// and may be used from any number of tasks.
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn StorageBackend>,
    max_value_size: u64,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            max_value_size: MAX_VALUE_SIZE,
        }
    }

    /// Override the value size limit (inclusive).
    pub fn with_max_value_size(mut self, limit: u64) -> Self {
        self.max_value_size = limit;
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn max_value_size(&self) -> u64 {
        self.max_value_size
    }

    async fn head_validated(&self, key: &ObjectKey) -> StoreResult<Option<ObjectMetadata>> {
        let Some(record) = self.backend.head(key.as_str()).await? else {
            return Ok(None);
        };
        match record.metadata {
            Some(wire) => Ok(Some(parse_object_metadata(wire)?)),
            None => Ok(None),
        }
    }

    /// Metadata of `key`, or `None` when nothing is stored there.
    pub async fn head(&self, key: impl Into<KeyInput>) -> StoreResult<Option<ObjectMetadata>> {
        let key = validate_key(Operation::Head, key)?;
        self.head_validated(&key).await
    }

    /// Read `key`.
    ///
    /// - `None`: nothing is stored at `key`.
    /// - `GetOutcome::Metadata`: the object exists but the predicate failed,
    ///   or the object is empty.
    /// - `GetOutcome::Body`: the predicate held; the body wraps freshly
    ///   fetched bytes, sliced to `options.range` when given.
    pub async fn get(
        &self,
        key: impl Into<KeyInput>,
        options: GetOptions,
    ) -> StoreResult<Option<GetOutcome>> {
        let key = validate_key(Operation::Get, key)?;
        validate_get_options(&options).map_err(|e| e.during(Operation::Get))?;
        let predicate =
            resolve_only_if(options.only_if.as_ref()).map_err(|e| e.during(Operation::Get))?;

        let Some(meta) = self.head_validated(&key).await? else {
            return Ok(None);
        };

        if !evaluate(&predicate, Some(&meta)) {
            debug!("GET {:?}: precondition failed against etag {}", key.as_str(), meta.etag);
            return Ok(Some(GetOutcome::Metadata(meta)));
        }
        if meta.size == 0 {
            return Ok(Some(GetOutcome::Metadata(meta)));
        }

        let Some(record) = self.backend.get(key.as_str()).await? else {
            warn!("GET {:?}: object vanished between head and get", key.as_str());
            return Err(StoreError::RangeNotSatisfiable);
        };
        let Some(wire) = record.metadata else {
            return Ok(None);
        };
        let Some(value) = record.value else {
            warn!("GET {:?}: backend returned metadata without a value", key.as_str());
            return Err(StoreError::RangeNotSatisfiable);
        };

        let mut metadata = parse_object_metadata(wire)?;
        let value = match options.range {
            Some(range) => {
                let resolved = resolve_range(&range, value.len() as u64);
                metadata.range = Some(resolved);
                slice(&value, resolved)
            }
            None => value,
        };
        Ok(Some(GetOutcome::Body(ObjectBody::new(metadata, value))))
    }

    /// Write `value` to `key`.
    ///
    /// Returns `None` without writing when the predicate fails against the
    /// current state of `key`. Otherwise the stored object's new metadata.
    pub async fn put(
        &self,
        key: impl Into<KeyInput>,
        value: impl Into<ValueInput>,
        options: PutOptions,
    ) -> StoreResult<Option<ObjectMetadata>> {
        let key = validate_key(Operation::Put, key)?;
        validate_put_options(&options).map_err(|e| e.during(Operation::Put))?;
        let PutOptions {
            only_if,
            http_metadata,
            custom_metadata,
            md5: expected_md5,
        } = options;
        let predicate =
            resolve_only_if(only_if.as_ref()).map_err(|e| e.during(Operation::Put))?;
        let http_metadata = parse_http_metadata(http_metadata);

        let current = self.head_validated(&key).await?;
        if !evaluate(&predicate, current.as_ref()) {
            debug!("PUT {:?}: precondition failed, nothing written", key.as_str());
            return Ok(None);
        }

        let value = value_codec::normalize(value.into()).await?;
        let length = value.len() as u64;
        if length > self.max_value_size {
            return Err(ValidationError::ValueTooLarge {
                length,
                limit: self.max_value_size,
            }
            .during(Operation::Put));
        }

        let digest = md5::compute(&value);
        if let Some(expected) = expected_md5 {
            if !digest_matches(&expected, &digest) {
                return Err(ValidationError::DigestMismatch.during(Operation::Put));
            }
        }

        let etag = format!("{:x}", digest);
        let metadata = ObjectMetadata {
            key: key.to_string(),
            version: Uuid::new_v4().simple().to_string(),
            size: length,
            http_etag: format!("\"{}\"", etag),
            etag,
            uploaded: Utc::now(),
            http_metadata,
            custom_metadata: custom_metadata.unwrap_or_default(),
            range: None,
        };

        let stored = self
            .backend
            .put(key.as_str(), value, encode_object_metadata(&metadata))
            .await?;
        let metadata = match stored.metadata {
            Some(wire) => parse_object_metadata(wire)?,
            None => metadata,
        };
        info!(
            "stored {:?} ({} bytes, etag {}) via {}",
            metadata.key,
            metadata.size,
            metadata.etag,
            self.backend.name()
        );
        Ok(Some(metadata))
    }

    /// Remove `key`. Returns `true` if an object was stored there.
    pub async fn delete(&self, key: impl Into<KeyInput>) -> StoreResult<bool> {
        let key = validate_key(Operation::Delete, key)?;
        let existed = self.backend.delete(key.as_str()).await?;
        debug!("DELETE {:?}: existed={}", key.as_str(), existed);
        Ok(existed)
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("backend", &self.backend.name())
            .field("max_value_size", &self.max_value_size)
            .finish()
    }
}

fn validate_get_options(options: &GetOptions) -> Result<(), ValidationError> {
    if let Some(range) = &options.range {
        if range.suffix.is_some() && (range.offset.is_some() || range.length.is_some()) {
            return Err(ValidationError::InvalidOption {
                field: "range",
                reason: "suffix cannot be combined with offset or length".into(),
            });
        }
    }
    Ok(())
}

fn validate_put_options(options: &PutOptions) -> Result<(), ValidationError> {
    if let Some(http_metadata) = &options.http_metadata {
        validate_http_metadata(http_metadata)?;
    }
    match &options.md5 {
        Some(Md5::Raw(bytes)) if bytes.len() != 16 => Err(ValidationError::InvalidOption {
            field: "md5",
            reason: format!("expected 16 bytes, got {}", bytes.len()),
        }),
        Some(Md5::Hex(hex))
            if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) =>
        {
            Err(ValidationError::InvalidOption {
                field: "md5",
                reason: "expected 32 hexadecimal characters".into(),
            })
        }
        _ => Ok(()),
    }
}

fn digest_matches(expected: &Md5, actual: &md5::Digest) -> bool {
    match expected {
        Md5::Raw(bytes) => bytes[..] == actual.0[..],
        Md5::Hex(hex) => hex.eq_ignore_ascii_case(&format!("{:x}", actual)),
    }
}

/// Clamp a requested range to a value of `size` bytes.
fn resolve_range(range: &RangeOptions, size: u64) -> ResolvedRange {
    if let Some(suffix) = range.suffix {
        let length = suffix.min(size);
        return ResolvedRange {
            offset: size - length,
            length,
        };
    }
    let offset = range.offset.unwrap_or(0).min(size);
    let available = size - offset;
    ResolvedRange {
        offset,
        length: range.length.map_or(available, |l| l.min(available)),
    }
}

fn slice(value: &Bytes, range: ResolvedRange) -> Bytes {
    let start = range.offset as usize;
    value.slice(start..start + range.length as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            object::{HttpMetadata, RawRecord, WireMetadata},
            options::{ConditionalPredicate, HttpMetadataInput, MetadataValue, OnlyIf},
        },
        services::backend::{BackendResult, MemoryBackend},
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    fn store() -> (ObjectStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (ObjectStore::new(backend.clone()), backend)
    }

    fn only_if(predicate: ConditionalPredicate) -> Option<OnlyIf> {
        Some(OnlyIf::Predicate(predicate))
    }

    /// Backend whose `get` disagrees with its `head`.
    struct Racy {
        inner: MemoryBackend,
        drop_metadata: bool,
    }

    #[async_trait]
    impl StorageBackend for Racy {
        async fn head(&self, key: &str) -> BackendResult<Option<RawRecord>> {
            self.inner.head(key).await
        }

        async fn get(&self, key: &str) -> BackendResult<Option<RawRecord>> {
            if self.drop_metadata {
                let record = self.inner.get(key).await?;
                Ok(record.map(|r| RawRecord {
                    value: r.value,
                    metadata: None,
                }))
            } else {
                Ok(None)
            }
        }

        async fn put(
            &self,
            key: &str,
            value: Bytes,
            metadata: WireMetadata,
        ) -> BackendResult<RawRecord> {
            self.inner.put(key, value, metadata).await
        }

        async fn delete(&self, key: &str) -> BackendResult<bool> {
            self.inner.delete(key).await
        }

        fn name(&self) -> &'static str {
            "racy"
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (store, _) = store();
        let mut custom = BTreeMap::new();
        custom.insert("owner".to_string(), "ops".to_string());
        let put = store
            .put(
                "docs/a.txt",
                "hello world",
                PutOptions {
                    http_metadata: Some(
                        HttpMetadata {
                            content_type: Some("text/plain".into()),
                            ..Default::default()
                        }
                        .into(),
                    ),
                    custom_metadata: Some(custom),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(put.size, 11);
        assert_eq!(put.etag, format!("{:x}", md5::compute("hello world")));
        assert_eq!(put.http_etag, format!("\"{}\"", put.etag));

        let outcome = store.get("docs/a.txt", GetOptions::default()).await.unwrap().unwrap();
        let mut body = outcome.into_body().expect("body");
        assert_eq!(body.metadata(), &put);
        assert_eq!(body.text().unwrap(), "hello world");
        assert_eq!(store.head("docs/a.txt").await.unwrap(), Some(put));
    }

    #[tokio::test]
    async fn missing_keys_are_absent() {
        let (store, _) = store();
        assert!(store.head("nope").await.unwrap().is_none());
        assert!(store.get("nope", GetOptions::default()).await.unwrap().is_none());
        assert!(!store.delete("nope").await.unwrap());
    }

    #[tokio::test]
    async fn failed_precondition_on_get_returns_metadata_only() {
        let (store, _) = store();
        let put = store.put("k", "v", PutOptions::default()).await.unwrap().unwrap();
        let outcome = store
            .get(
                "k",
                GetOptions {
                    only_if: only_if(ConditionalPredicate {
                        etag_matches: Some("other".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.has_body());
        assert_eq!(outcome.metadata(), &put);
    }

    #[tokio::test]
    async fn empty_objects_never_carry_a_body() {
        let (store, _) = store();
        let put = store.put("empty", ValueInput::Null, PutOptions::default()).await.unwrap().unwrap();
        assert_eq!(put.size, 0);
        for predicate in [
            ConditionalPredicate::default(),
            ConditionalPredicate {
                etag_matches: Some(put.etag.clone().into()),
                ..Default::default()
            },
            ConditionalPredicate {
                etag_matches: Some("mismatch".into()),
                ..Default::default()
            },
        ] {
            let outcome = store
                .get(
                    "empty",
                    GetOptions {
                        only_if: only_if(predicate),
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
                .unwrap();
            assert!(!outcome.has_body());
        }
    }

    #[tokio::test]
    async fn conditional_put_rejection_leaves_object_untouched() {
        let (store, backend) = store();
        let first = store.put("k", "v1", PutOptions::default()).await.unwrap().unwrap();
        let second = store
            .put(
                "k",
                "v2",
                PutOptions {
                    only_if: only_if(ConditionalPredicate {
                        etag_does_not_match: Some(first.etag.clone().into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(backend.value("k").unwrap(), Bytes::from_static(b"v1"));
        assert_eq!(store.head("k").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn etag_conditions_against_missing_keys() {
        let (store, _) = store();
        let create_only = || PutOptions {
            only_if: only_if(ConditionalPredicate {
                etag_does_not_match: Some("*".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(store.put("k", "a", create_only()).await.unwrap().is_some());

        let must_exist = PutOptions {
            only_if: only_if(ConditionalPredicate {
                etag_matches: Some("anything".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(store.put("fresh", "a", must_exist).await.unwrap().is_none());
        assert!(store.head("fresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn matching_etag_allows_overwrite() {
        let (store, backend) = store();
        let first = store.put("k", "v1", PutOptions::default()).await.unwrap().unwrap();
        let second = store
            .put(
                "k",
                "v2",
                PutOptions {
                    only_if: only_if(ConditionalPredicate {
                        etag_matches: Some(first.http_etag.clone().into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_ne!(second.etag, first.etag);
        assert_ne!(second.version, first.version);
        assert_eq!(backend.value("k").unwrap(), Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn value_size_limit_is_inclusive() {
        let (store, _) = store();
        let store = store.with_max_value_size(8);
        assert!(store.put("k", vec![0u8; 8], PutOptions::default()).await.unwrap().is_some());
        let err = store
            .put("k", vec![0u8; 9], PutOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.validation(),
            Some(&ValidationError::ValueTooLarge { length: 9, limit: 8 })
        );
    }

    #[test]
    fn default_limit_is_five_gb_minus_five_mb() {
        assert_eq!(MAX_VALUE_SIZE, 4_995_000_000);
        let (store, _) = store();
        assert_eq!(store.max_value_size(), MAX_VALUE_SIZE);
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected_per_operation() {
        let (store, _) = store();
        let long = "x".repeat(1024);
        let err = store.head(long.as_str()).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation { method: Operation::Head, .. }));
        let err = store.get(long.as_str(), GetOptions::default()).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 414);
        let err = store
            .put(vec![0xD800u16], "v", PutOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.validation(), Some(&ValidationError::IllegalUnicode));
    }

    #[tokio::test]
    async fn md5_option_must_match_value() {
        let (store, _) = store();
        let digest = md5::compute("payload");
        let ok = store
            .put(
                "k",
                "payload",
                PutOptions {
                    md5: Some(Md5::Hex(format!("{:X}", digest))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(ok.is_some());
        let ok = store
            .put(
                "k",
                "payload",
                PutOptions {
                    md5: Some(Md5::Raw(Bytes::copy_from_slice(&digest.0))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(ok.is_some());

        let err = store
            .put(
                "k",
                "tampered",
                PutOptions {
                    md5: Some(Md5::Raw(Bytes::copy_from_slice(&digest.0))),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.validation(), Some(&ValidationError::DigestMismatch));

        let err = store
            .put(
                "k",
                "payload",
                PutOptions {
                    md5: Some(Md5::Hex("xyz".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::InvalidOption { field: "md5", .. })
        ));
    }

    #[tokio::test]
    async fn invalid_http_metadata_is_rejected_before_writing() {
        let (store, backend) = store();
        let mut fields = BTreeMap::new();
        fields.insert("contentType".to_string(), MetadataValue::Timestamp(Utc::now()));
        let err = store
            .put(
                "k",
                "v",
                PutOptions {
                    http_metadata: Some(HttpMetadataInput::Fields(fields)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::InvalidMetadataField { .. })
        ));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn ranges_slice_the_body() {
        let (store, _) = store();
        store.put("k", "0123456789", PutOptions::default()).await.unwrap();
        let cases = [
            (RangeOptions { offset: Some(2), length: Some(3), suffix: None }, "234"),
            (RangeOptions { offset: Some(8), length: None, suffix: None }, "89"),
            (RangeOptions { offset: None, length: None, suffix: Some(4) }, "6789"),
            (RangeOptions { offset: None, length: None, suffix: Some(40) }, "0123456789"),
            (RangeOptions { offset: Some(20), length: Some(5), suffix: None }, ""),
        ];
        for (range, expected) in cases {
            let mut body = store
                .get(
                    "k",
                    GetOptions {
                        range: Some(range),
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
                .unwrap()
                .into_body()
                .unwrap();
            assert_eq!(body.metadata().range.map(|r| r.length), Some(expected.len() as u64));
            assert_eq!(body.text().unwrap(), expected);
        }

        let err = store
            .get(
                "k",
                GetOptions {
                    range: Some(RangeOptions {
                        offset: Some(1),
                        length: None,
                        suffix: Some(1),
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn object_vanishing_after_head_is_range_not_satisfiable() {
        let backend = Arc::new(Racy {
            inner: MemoryBackend::new(),
            drop_metadata: false,
        });
        let store = ObjectStore::new(backend);
        store.put("k", "v", PutOptions::default()).await.unwrap();
        assert!(matches!(
            store.get("k", GetOptions::default()).await,
            Err(StoreError::RangeNotSatisfiable)
        ));
    }

    #[tokio::test]
    async fn fetched_record_without_metadata_is_absent() {
        let backend = Arc::new(Racy {
            inner: MemoryBackend::new(),
            drop_metadata: true,
        });
        let store = ObjectStore::new(backend);
        store.put("k", "v", PutOptions::default()).await.unwrap();
        assert!(store.get("k", GetOptions::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_object() {
        let (store, _) = store();
        store.put("k", "v", PutOptions::default()).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(store.head("k").await.unwrap().is_none());
    }
}
