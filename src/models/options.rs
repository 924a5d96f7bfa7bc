//! Option bags accepted by `get` and `put`, and the conditional predicate
//! they share.

use crate::models::object::HttpMetadata;
use axum::http::HeaderMap;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// An etag constraint: a single etag or a list matched as "any of".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EtagCondition {
    One(String),
    Any(Vec<String>),
}

impl EtagCondition {
    /// True when `etag` equals the single value or any listed value.
    pub fn matches(&self, etag: &str) -> bool {
        match self {
            EtagCondition::One(expected) => expected == etag,
            EtagCondition::Any(expected) => expected.iter().any(|e| e == etag),
        }
    }

    /// An empty single etag carries no constraint.
    pub fn is_blank(&self) -> bool {
        matches!(self, EtagCondition::One(e) if e.is_empty())
    }
}

impl From<&str> for EtagCondition {
    fn from(value: &str) -> Self {
        EtagCondition::One(value.to_string())
    }
}

impl From<String> for EtagCondition {
    fn from(value: String) -> Self {
        EtagCondition::One(value)
    }
}

impl From<Vec<String>> for EtagCondition {
    fn from(value: Vec<String>) -> Self {
        EtagCondition::Any(value)
    }
}

impl From<Vec<&str>> for EtagCondition {
    fn from(value: Vec<&str>) -> Self {
        EtagCondition::Any(value.into_iter().map(str::to_string).collect())
    }
}

/// Constraints gating whether a read returns a body or a write proceeds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConditionalPredicate {
    pub etag_matches: Option<EtagCondition>,
    pub etag_does_not_match: Option<EtagCondition>,
    pub uploaded_before: Option<DateTime<Utc>>,
    pub uploaded_after: Option<DateTime<Utc>>,
}

impl ConditionalPredicate {
    pub fn is_empty(&self) -> bool {
        self.etag_matches.is_none()
            && self.etag_does_not_match.is_none()
            && self.uploaded_before.is_none()
            && self.uploaded_after.is_none()
    }
}

/// `onlyIf` as a caller may supply it: a typed predicate or raw request
/// headers (`If-Match`, `If-None-Match`, `If-Unmodified-Since`,
/// `If-Modified-Since`).
#[derive(Clone, Debug, PartialEq)]
pub enum OnlyIf {
    Predicate(ConditionalPredicate),
    Headers(HeaderMap),
}

impl From<ConditionalPredicate> for OnlyIf {
    fn from(value: ConditionalPredicate) -> Self {
        OnlyIf::Predicate(value)
    }
}

impl From<HeaderMap> for OnlyIf {
    fn from(value: HeaderMap) -> Self {
        OnlyIf::Headers(value)
    }
}

/// Byte range requested by a `get`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeOptions {
    pub offset: Option<u64>,
    pub length: Option<u64>,
    /// Read the last `suffix` bytes. Exclusive with `offset` and `length`.
    pub suffix: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetOptions {
    pub only_if: Option<OnlyIf>,
    pub range: Option<RangeOptions>,
}

/// A loosely-typed metadata field value, as it arrives from untyped callers.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataValue {
    String(String),
    Timestamp(DateTime<Utc>),
    Other(serde_json::Value),
}

/// `httpMetadata` as a caller may supply it.
#[derive(Clone, Debug, PartialEq)]
pub enum HttpMetadataInput {
    Typed(HttpMetadata),
    Fields(BTreeMap<String, MetadataValue>),
    Headers(HeaderMap),
}

impl From<HttpMetadata> for HttpMetadataInput {
    fn from(value: HttpMetadata) -> Self {
        HttpMetadataInput::Typed(value)
    }
}

impl From<HeaderMap> for HttpMetadataInput {
    fn from(value: HeaderMap) -> Self {
        HttpMetadataInput::Headers(value)
    }
}

/// Expected MD5 of a value: 16 raw bytes or a hex string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Md5 {
    Raw(Bytes),
    Hex(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PutOptions {
    pub only_if: Option<OnlyIf>,
    pub http_metadata: Option<HttpMetadataInput>,
    pub custom_metadata: Option<BTreeMap<String, String>>,
    pub md5: Option<Md5>,
}
