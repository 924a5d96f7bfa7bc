//! Metadata coding: whitelisting HTTP fields, validating their types, and
//! converting timestamps between the backend's string form and typed values.

use crate::{
    models::{
        object::{HttpMetadata, ObjectMetadata, WireHttpMetadata, WireMetadata},
        options::{HttpMetadataInput, MetadataValue},
    },
    services::error::{StoreError, StoreResult, ValidationError},
};
use axum::http::HeaderMap;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

/// Rewrite a camelCase field name as a dash-separated lower-case header name.
pub fn camel_to_dash(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a wire timestamp. RFC 3339 is what we write; RFC 2822 is accepted
/// for values that came in through HTTP headers.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Wire form of a timestamp. Keeps sub-second precision so a round trip
/// through the backend is lossless.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// IMF-fixdate, the HTTP-date form used for every date-valued header.
pub fn format_http_date(value: &DateTime<Utc>) -> String {
    value.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Check field types of caller-supplied HTTP metadata.
///
/// Unknown fields are not rejected here; they are dropped by
/// [`parse_http_metadata`]. Header-map input is always well-typed.
pub fn validate_http_metadata(input: &HttpMetadataInput) -> Result<(), ValidationError> {
    let HttpMetadataInput::Fields(fields) = input else {
        return Ok(());
    };
    for (name, value) in fields {
        match (name.as_str(), value) {
            ("cacheExpiry", MetadataValue::Timestamp(_)) => {}
            ("cacheExpiry", _) => {
                return Err(ValidationError::InvalidMetadataField {
                    field: name.clone(),
                    reason: "a timestamp or absent",
                });
            }
            (_, MetadataValue::String(_)) => {}
            (_, _) => {
                return Err(ValidationError::InvalidMetadataField {
                    field: name.clone(),
                    reason: "a string or absent",
                });
            }
        }
    }
    Ok(())
}

/// Keep only the whitelisted fields of `input`.
pub fn parse_http_metadata(input: Option<HttpMetadataInput>) -> HttpMetadata {
    match input {
        None => HttpMetadata::default(),
        Some(HttpMetadataInput::Typed(meta)) => meta,
        Some(HttpMetadataInput::Fields(fields)) => {
            let text = |name: &str| match fields.get(name) {
                Some(MetadataValue::String(value)) => Some(value.clone()),
                _ => None,
            };
            let dropped = fields
                .keys()
                .filter(|k| !HttpMetadata::FIELDS.contains(&k.as_str()))
                .count();
            if dropped > 0 {
                debug!("dropped {} non-whitelisted http metadata fields", dropped);
            }
            HttpMetadata {
                content_type: text("contentType"),
                content_language: text("contentLanguage"),
                content_disposition: text("contentDisposition"),
                content_encoding: text("contentEncoding"),
                cache_control: text("cacheControl"),
                cache_expiry: match fields.get("cacheExpiry") {
                    Some(MetadataValue::Timestamp(ts)) => Some(*ts),
                    _ => None,
                },
            }
        }
        Some(HttpMetadataInput::Headers(headers)) => http_metadata_from_headers(&headers),
    }
}

fn http_metadata_from_headers(headers: &HeaderMap) -> HttpMetadata {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    HttpMetadata {
        content_type: text("content-type"),
        content_language: text("content-language"),
        content_disposition: text("content-disposition"),
        content_encoding: text("content-encoding"),
        cache_control: text("cache-control"),
        cache_expiry: text("cache-expiry").and_then(|raw| {
            let parsed = parse_timestamp(&raw);
            if parsed.is_none() {
                debug!("ignoring unparseable cache-expiry header {:?}", raw);
            }
            parsed
        }),
    }
}

/// Decode metadata returned by a backend into its typed form.
pub fn parse_object_metadata(wire: WireMetadata) -> StoreResult<ObjectMetadata> {
    let uploaded = parse_timestamp(&wire.uploaded).ok_or_else(|| StoreError::CorruptMetadata {
        key: wire.key.clone(),
        reason: format!("uploaded timestamp {:?} is not a date", wire.uploaded),
    })?;
    let http = wire.http_metadata;
    let cache_expiry = match http.cache_expiry.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            parse_timestamp(raw).ok_or_else(|| StoreError::CorruptMetadata {
                key: wire.key.clone(),
                reason: format!("cacheExpiry {:?} is not a date", raw),
            })?,
        ),
    };

    Ok(ObjectMetadata {
        key: wire.key,
        version: wire.version,
        size: wire.size,
        etag: wire.etag,
        http_etag: wire.http_etag,
        uploaded,
        http_metadata: HttpMetadata {
            content_type: http.content_type,
            content_language: http.content_language,
            content_disposition: http.content_disposition,
            content_encoding: http.content_encoding,
            cache_control: http.cache_control,
            cache_expiry,
        },
        custom_metadata: wire.custom_metadata,
        range: None,
    })
}

/// Encode typed metadata for the backend.
pub fn encode_object_metadata(meta: &ObjectMetadata) -> WireMetadata {
    let http = &meta.http_metadata;
    WireMetadata {
        key: meta.key.clone(),
        version: meta.version.clone(),
        size: meta.size,
        etag: meta.etag.clone(),
        http_etag: meta.http_etag.clone(),
        uploaded: format_timestamp(&meta.uploaded),
        http_metadata: WireHttpMetadata {
            content_type: http.content_type.clone(),
            content_language: http.content_language.clone(),
            content_disposition: http.content_disposition.clone(),
            content_encoding: http.content_encoding.clone(),
            cache_control: http.cache_control.clone(),
            cache_expiry: http.cache_expiry.as_ref().map(format_timestamp),
        },
        custom_metadata: meta.custom_metadata.clone(),
    }
}
