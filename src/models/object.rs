//! Represents an object (metadata plus optional body) held by the store.

use crate::{
    models::value::Blob,
    services::{
        error::{StoreError, StoreResult},
        metadata_codec::{camel_to_dash, format_http_date},
    },
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections::BTreeMap, io, mem};
use tracing::debug;

/// Whitelisted HTTP fields carried alongside an object.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_expiry: Option<DateTime<Utc>>,
}

impl HttpMetadata {
    /// The camelCase field names accepted by the store, in header order.
    pub const FIELDS: [&'static str; 6] = [
        "contentType",
        "contentLanguage",
        "contentDisposition",
        "contentEncoding",
        "cacheControl",
        "cacheExpiry",
    ];

    /// Present fields as `(camelCaseName, headerValue)` pairs.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let strings = [
            ("contentType", &self.content_type),
            ("contentLanguage", &self.content_language),
            ("contentDisposition", &self.content_disposition),
            ("contentEncoding", &self.content_encoding),
            ("cacheControl", &self.cache_control),
        ];
        let mut entries: Vec<(&'static str, String)> = strings
            .into_iter()
            .filter_map(|(name, value)| value.clone().map(|v| (name, v)))
            .collect();
        if let Some(expiry) = self.cache_expiry {
            entries.push(("cacheExpiry", format_http_date(&expiry)));
        }
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Byte window actually served by a ranged read.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedRange {
    pub offset: u64,
    pub length: u64,
}

/// Typed metadata of a stored object, as exposed to callers.
///
/// `etag`, `http_etag`, `version` and `uploaded` are assigned when the object
/// is written and never change afterwards; a later `put` replaces the whole
/// record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub key: String,
    pub version: String,
    pub size: u64,
    pub etag: String,
    pub http_etag: String,
    pub uploaded: DateTime<Utc>,
    pub http_metadata: HttpMetadata,
    pub custom_metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<ResolvedRange>,
}

impl ObjectMetadata {
    /// Project `http_metadata` onto a header collection.
    ///
    /// Field names are rewritten from camelCase to dash-separated lower case,
    /// so `contentType` lands in `content-type`.
    pub fn write_http_metadata(&self, headers: &mut HeaderMap) {
        for (field, value) in self.http_metadata.entries() {
            let name = camel_to_dash(field);
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => debug!("skipping unrepresentable header {}={:?}", name, value),
            }
        }
    }
}

/// Metadata as the backend persists it: timestamps stay in string form until
/// the metadata codec decodes them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireMetadata {
    pub key: String,
    #[serde(default)]
    pub version: String,
    pub size: u64,
    pub etag: String,
    pub http_etag: String,
    pub uploaded: String,
    #[serde(default)]
    pub http_metadata: WireHttpMetadata,
    #[serde(default)]
    pub custom_metadata: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireHttpMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_expiry: Option<String>,
}

/// What a backend hands back for a key. Either half may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub value: Option<Bytes>,
    pub metadata: Option<WireMetadata>,
}

/// A fetched object whose bytes can be read exactly once.
#[derive(Debug)]
pub struct ObjectBody {
    metadata: ObjectMetadata,
    value: Bytes,
    consumed: bool,
}

impl ObjectBody {
    pub fn new(metadata: ObjectMetadata, value: Bytes) -> Self {
        Self {
            metadata,
            value,
            consumed: false,
        }
    }

    pub fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }

    pub fn into_metadata(self) -> ObjectMetadata {
        self.metadata
    }

    pub fn body_used(&self) -> bool {
        self.consumed
    }

    fn take(&mut self) -> StoreResult<Bytes> {
        if self.consumed {
            return Err(StoreError::BodyAlreadyUsed);
        }
        self.consumed = true;
        Ok(mem::take(&mut self.value))
    }

    /// Hand out the body as a byte stream. Empty bodies yield no chunks.
    pub fn stream(&mut self) -> StoreResult<BoxStream<'static, io::Result<Bytes>>> {
        let value = self.take()?;
        let chunk = (!value.is_empty()).then_some(Ok(value));
        Ok(futures::stream::iter(chunk).boxed())
    }

    pub fn bytes(&mut self) -> StoreResult<Bytes> {
        self.take()
    }

    /// Decode the body as UTF-8, replacing invalid sequences.
    pub fn text(&mut self) -> StoreResult<String> {
        let value = self.take()?;
        Ok(String::from_utf8_lossy(&value).into_owned())
    }

    pub fn json<T: DeserializeOwned>(&mut self) -> StoreResult<T> {
        let value = self.take()?;
        Ok(serde_json::from_slice(&value)?)
    }

    pub fn blob(&mut self) -> StoreResult<Blob> {
        let value = self.take()?;
        Ok(Blob::new(
            value,
            self.metadata.http_metadata.content_type.clone(),
        ))
    }
}

/// Result of a `get` on an existing key.
///
/// `Metadata` means the object exists but no body is returned: either the
/// precondition failed or the object is empty.
#[derive(Debug)]
pub enum GetOutcome {
    Metadata(ObjectMetadata),
    Body(ObjectBody),
}

impl GetOutcome {
    pub fn metadata(&self) -> &ObjectMetadata {
        match self {
            GetOutcome::Metadata(meta) => meta,
            GetOutcome::Body(body) => body.metadata(),
        }
    }

    pub fn has_body(&self) -> bool {
        matches!(self, GetOutcome::Body(_))
    }

    pub fn into_body(self) -> Option<ObjectBody> {
        match self {
            GetOutcome::Body(body) => Some(body),
            GetOutcome::Metadata(_) => None,
        }
    }
}
