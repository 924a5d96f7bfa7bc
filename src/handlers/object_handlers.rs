//! HTTP handlers for object operations.
//! Maps request headers onto facade options and facade outcomes onto status
//! codes; all validation and conditional logic lives in `ObjectStore`.

use crate::{
    errors::AppError,
    models::{
        object::{GetOutcome, ObjectMetadata},
        options::{
            ConditionalPredicate, GetOptions, HttpMetadataInput, Md5, OnlyIf, PutOptions,
            RangeOptions,
        },
        value::ValueInput,
    },
    services::{
        conditional::evaluate,
        error::Operation,
        metadata_codec::format_http_date,
        object_store::ObjectStore,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use futures::StreamExt;
use serde::Deserialize;
use std::{collections::BTreeMap, io};
use tracing::debug;

/// Prefix of request/response headers carrying custom metadata.
pub const CUSTOM_METADATA_PREFIX: &str = "x-meta-";

/// Query params accepted by GET for ranged reads.
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub offset: Option<u64>,
    pub length: Option<u64>,
    pub suffix: Option<u64>,
}

impl RangeQuery {
    fn into_options(self) -> Option<RangeOptions> {
        if self.offset.is_none() && self.length.is_none() && self.suffix.is_none() {
            return None;
        }
        Some(RangeOptions {
            offset: self.offset,
            length: self.length,
            suffix: self.suffix,
        })
    }
}

/// Conditional request headers as a predicate, `None` when there are none.
///
/// HTTP dates only carry whole seconds while `uploaded` does not, so date
/// bounds are widened to the end of their second: an object uploaded at
/// 12:00:00.4 is neither modified since nor after `12:00:00 GMT`.
fn http_predicate(
    headers: &HeaderMap,
    method: Operation,
) -> Result<Option<ConditionalPredicate>, AppError> {
    let predicate = ConditionalPredicate::from_headers(headers)
        .map_err(|e| AppError::from(e.during(method)))?;
    if predicate.is_empty() {
        return Ok(None);
    }
    let end_of_second = |ts: DateTime<Utc>| ts.trunc_subsecs(0) + TimeDelta::seconds(1);
    Ok(Some(ConditionalPredicate {
        uploaded_before: predicate
            .uploaded_before
            .map(|ts| end_of_second(ts) - TimeDelta::nanoseconds(1)),
        uploaded_after: predicate.uploaded_after.map(end_of_second),
        ..predicate
    }))
}

fn custom_metadata(headers: &HeaderMap) -> Option<BTreeMap<String, String>> {
    let custom: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(CUSTOM_METADATA_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();
    (!custom.is_empty()).then_some(custom)
}

fn content_md5(headers: &HeaderMap) -> Result<Option<Md5>, AppError> {
    let Some(value) = headers.get("content-md5") else {
        return Ok(None);
    };
    let decoded = value
        .to_str()
        .ok()
        .and_then(|v| general_purpose::STANDARD.decode(v.trim()).ok())
        .ok_or_else(|| AppError::bad_request("Content-MD5 must be base64"))?;
    Ok(Some(Md5::Raw(decoded.into())))
}

/// Upload an object to `/objects/{*key}`.
pub async fn put_object(
    State(store): State<ObjectStore>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let options = PutOptions {
        only_if: http_predicate(&headers, Operation::Put)?.map(OnlyIf::Predicate),
        http_metadata: Some(HttpMetadataInput::Headers(headers.clone())),
        custom_metadata: custom_metadata(&headers),
        md5: content_md5(&headers)?,
    };

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));
    let value = ValueInput::Stream(stream.boxed());

    let Some(meta) = store.put(key.as_str(), value, options).await? else {
        return Err(AppError::precondition_failed(format!(
            "precondition failed for `{}`",
            key
        )));
    };

    let mut response = Json(&meta).into_response();
    if let Ok(etag) = HeaderValue::from_str(&meta.http_etag) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    Ok(response)
}

/// Download `/objects/{*key}`.
///
/// A failed `If-Match`/`If-Unmodified-Since` answers 412, a failed
/// `If-None-Match`/`If-Modified-Since` answers 304.
pub async fn get_object(
    State(store): State<ObjectStore>,
    Path(key): Path<String>,
    Query(range): Query<RangeQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let predicate = http_predicate(&headers, Operation::Get)?.unwrap_or_default();
    let options = GetOptions {
        only_if: (!predicate.is_empty()).then(|| OnlyIf::Predicate(predicate.clone())),
        range: range.into_options(),
    };

    let outcome = store
        .get(key.as_str(), options)
        .await?
        .ok_or_else(|| AppError::not_found(format!("object `{}` not found", key)))?;

    match outcome {
        GetOutcome::Body(mut body) => {
            let ranged = body.metadata().range.is_some();
            let mut response = Response::new(Body::from_stream(body.stream()?));
            *response.status_mut() = if ranged {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };
            set_object_headers(response.headers_mut(), body.metadata());
            Ok(response)
        }
        GetOutcome::Metadata(meta) => {
            if evaluate(&predicate, Some(&meta)) {
                // Empty object: nothing to stream.
                let mut response = Response::new(Body::empty());
                set_object_headers(response.headers_mut(), &meta);
                return Ok(response);
            }

            let strong = ConditionalPredicate {
                etag_matches: predicate.etag_matches,
                uploaded_before: predicate.uploaded_before,
                ..Default::default()
            };
            if !evaluate(&strong, Some(&meta)) {
                debug!("GET {:?}: answering 412", key);
                return Err(AppError::precondition_failed(format!(
                    "precondition failed for `{}`",
                    key
                )));
            }
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            set_object_headers(response.headers_mut(), &meta);
            response.headers_mut().remove(header::CONTENT_LENGTH);
            Ok(response)
        }
    }
}

/// HEAD `/objects/{*key}` — same headers as GET but no body.
pub async fn head_object(
    State(store): State<ObjectStore>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let meta = store
        .head(key.as_str())
        .await?
        .ok_or_else(|| AppError::not_found(format!("object `{}` not found", key)))?;
    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/objects/{*key}`
pub async fn delete_object(
    State(store): State<ObjectStore>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if store.delete(key.as_str()).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("object `{}` not found", key)))
    }
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectMetadata) {
    meta.write_http_metadata(headers);
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
    }

    let length = meta.range.map_or(meta.size, |r| r.length);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Some(range) = meta.range {
        let last = (range.offset + range.length).saturating_sub(1);
        if let Ok(value) = HeaderValue::from_str(&format!(
            "bytes {}-{}/{}",
            range.offset, last, meta.size
        )) {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.http_etag) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) =
        HeaderValue::from_str(&format_http_date(&meta.uploaded))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.version) {
        headers.insert(HeaderName::from_static("x-object-version"), value);
    }

    for (key, value) in &meta.custom_metadata {
        let name = format!("{}{}", CUSTOM_METADATA_PREFIX, key);
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!("custom metadata {:?} is not a valid header", key),
        }
    }
}
