//! Conditional-request evaluation.
//!
//! [`evaluate`] decides whether an `onlyIf` predicate holds for the current
//! state of a key. It is pure; the facade decides what a failed predicate
//! means for the operation (no body on `get`, no write on `put`).

use crate::{
    models::{
        object::ObjectMetadata,
        options::{ConditionalPredicate, EtagCondition, OnlyIf},
    },
    services::{error::ValidationError, metadata_codec::parse_timestamp},
};
use axum::http::{HeaderMap, header};
use chrono::{DateTime, Utc};

/// Outcome of one etag clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Clause {
    Unconstrained,
    Constrained(bool),
}

impl Clause {
    fn from_condition(condition: Option<&EtagCondition>, test: impl FnOnce(&EtagCondition) -> bool) -> Self {
        match condition {
            Some(cond) if !cond.is_blank() => Clause::Constrained(test(cond)),
            _ => Clause::Unconstrained,
        }
    }
}

/// Evaluate `predicate` against the current metadata of a key, `None` when
/// the key holds no object.
///
/// Precedence:
/// - a missing object only satisfies predicates that set neither
///   `etag_matches` nor `uploaded_after`;
/// - a failed etag clause fails the predicate outright;
/// - a successful `etag_matches` suppresses the `uploaded_before` bound, and a
///   successful `etag_does_not_match` suppresses the `uploaded_after` bound.
pub fn evaluate(predicate: &ConditionalPredicate, metadata: Option<&ObjectMetadata>) -> bool {
    let Some(meta) = metadata else {
        return predicate.etag_matches.is_none() && predicate.uploaded_after.is_none();
    };

    let if_match = Clause::from_condition(predicate.etag_matches.as_ref(), |c| c.matches(&meta.etag));
    if if_match == Clause::Constrained(false) {
        return false;
    }
    let if_none_match = Clause::from_condition(predicate.etag_does_not_match.as_ref(), |c| {
        !c.matches(&meta.etag)
    });
    if if_none_match == Clause::Constrained(false) {
        return false;
    }

    if if_match != Clause::Constrained(true)
        && predicate
            .uploaded_before
            .is_some_and(|before| meta.uploaded > before)
    {
        return false;
    }
    if if_none_match != Clause::Constrained(true)
        && predicate
            .uploaded_after
            .is_some_and(|after| meta.uploaded < after)
    {
        return false;
    }
    true
}

fn strip_quotes(input: &str) -> String {
    let input = input.trim();
    let input = input.strip_prefix('"').unwrap_or(input);
    let input = input.strip_suffix('"').unwrap_or(input);
    input.to_string()
}

/// Parse an etag header value; comma-separated values become a list.
fn parse_etag_list(input: &str) -> EtagCondition {
    if input.contains(',') {
        EtagCondition::Any(input.split(',').map(strip_quotes).collect())
    } else {
        EtagCondition::One(strip_quotes(input))
    }
}

fn normalize_etags(condition: EtagCondition) -> EtagCondition {
    match condition {
        EtagCondition::One(value) => parse_etag_list(&value),
        EtagCondition::Any(values) => {
            EtagCondition::Any(values.iter().map(|v| strip_quotes(v)).collect())
        }
    }
}

/// Normalize a typed predicate: quoted etags are unquoted and a single etag
/// holding commas is split into a list.
pub fn parse_only_if(predicate: ConditionalPredicate) -> ConditionalPredicate {
    ConditionalPredicate {
        etag_matches: predicate.etag_matches.map(normalize_etags),
        etag_does_not_match: predicate.etag_does_not_match.map(normalize_etags),
        ..predicate
    }
}

fn header_date(
    headers: &HeaderMap,
    name: header::HeaderName,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let Some(value) = headers.get(&name) else {
        return Ok(None);
    };
    let parsed = value.to_str().ok().and_then(|raw| parse_timestamp(&strip_quotes(raw)));
    match parsed {
        Some(ts) => Ok(Some(ts)),
        None => Err(ValidationError::InvalidOption {
            field,
            reason: format!("{} is not a valid HTTP date", name),
        }),
    }
}

fn header_etags(
    headers: &HeaderMap,
    name: header::HeaderName,
    field: &'static str,
) -> Result<Option<EtagCondition>, ValidationError> {
    match headers.get(&name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|raw| Some(parse_etag_list(raw)))
            .map_err(|_| ValidationError::InvalidOption {
                field,
                reason: format!("{} must be visible ASCII", name),
            }),
    }
}

/// Build a predicate from HTTP conditional request headers.
pub fn predicate_from_headers(headers: &HeaderMap) -> Result<ConditionalPredicate, ValidationError> {
    Ok(ConditionalPredicate {
        etag_matches: header_etags(headers, header::IF_MATCH, "etagMatches")?,
        etag_does_not_match: header_etags(headers, header::IF_NONE_MATCH, "etagDoesNotMatch")?,
        uploaded_before: header_date(headers, header::IF_UNMODIFIED_SINCE, "uploadedBefore")?,
        uploaded_after: header_date(headers, header::IF_MODIFIED_SINCE, "uploadedAfter")?,
    })
}

impl ConditionalPredicate {
    /// See [`predicate_from_headers`].
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ValidationError> {
        predicate_from_headers(headers)
    }
}

/// Resolve an optional `onlyIf` into a normalized predicate. Absent means an
/// empty predicate, which always holds.
pub fn resolve_only_if(only_if: Option<&OnlyIf>) -> Result<ConditionalPredicate, ValidationError> {
    match only_if {
        None => Ok(ConditionalPredicate::default()),
        Some(OnlyIf::Predicate(predicate)) => Ok(parse_only_if(predicate.clone())),
        Some(OnlyIf::Headers(headers)) => predicate_from_headers(headers),
    }
}
