//! Error taxonomy for the object-store facade.
//!
//! Errors are values, never panics: every facade operation returns a
//! [`StoreResult`] and the HTTP boundary maps each kind onto a status code.
//! A failed precondition is *not* an error and never appears here.

use crate::services::backend::BackendError;
use axum::http::StatusCode;
use std::{fmt, io};
use thiserror::Error;

/// The facade operation an error was raised from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Head,
    Get,
    Put,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Head => "HEAD",
            Operation::Get => "GET",
            Operation::Put => "PUT",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bad input data supplied by a caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("UTF-8 encoded length of {length} exceeds key length limit of {limit}.")]
    KeyTooLong { length: usize, limit: usize },
    #[error("Key contains an illegal unicode value(s).")]
    IllegalUnicode,
    #[error("{field}'s value must be {reason}.")]
    InvalidMetadataField { field: String, reason: &'static str },
    #[error("{field}: {reason}")]
    InvalidOption { field: &'static str, reason: String },
    #[error("Value length of {length} exceeds limit of {limit}.")]
    ValueTooLarge { length: u64, limit: u64 },
    #[error("The Content-MD5 you specified did not match what was received.")]
    DigestMismatch,
}

impl ValidationError {
    /// Attach the operation that rejected the input.
    pub fn during(self, method: Operation) -> StoreError {
        StoreError::Validation {
            method,
            source: self,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ValidationError::KeyTooLong { .. } => StatusCode::URI_TOO_LONG,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{method} failed: ({}) {source}", .source.status().as_u16())]
    Validation {
        method: Operation,
        #[source]
        source: ValidationError,
    },
    /// The value handed to `put` is not something the codec can buffer.
    #[error("unsupported value: {0}")]
    UnsupportedValueType(String),
    #[error("GET failed: (400) The requested range is not satisfiable.")]
    RangeNotSatisfiable,
    #[error("Body already used.")]
    BodyAlreadyUsed,
    #[error("stored metadata for `{key}` is corrupt: {reason}")]
    CorruptMetadata { key: String, reason: String },
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// HTTP status the boundary should answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::Validation { source, .. } => source.status(),
            StoreError::RangeNotSatisfiable => StatusCode::BAD_REQUEST,
            StoreError::Json(_) => StatusCode::BAD_REQUEST,
            StoreError::UnsupportedValueType(_)
            | StoreError::BodyAlreadyUsed
            | StoreError::CorruptMetadata { .. }
            | StoreError::Backend(_)
            | StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The validation failure, if this error is one.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            StoreError::Validation { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_too_long_maps_to_414() {
        let err = ValidationError::KeyTooLong {
            length: 1024,
            limit: 1024,
        }
        .during(Operation::Put);
        assert_eq!(err.status(), StatusCode::URI_TOO_LONG);
        assert_eq!(
            err.to_string(),
            "PUT failed: (414) UTF-8 encoded length of 1024 exceeds key length limit of 1024."
        );
    }

    #[test]
    fn other_validation_errors_map_to_400() {
        let err = ValidationError::IllegalUnicode.during(Operation::Get);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.validation(),
            Some(&ValidationError::IllegalUnicode)
        );
        assert_eq!(StoreError::RangeNotSatisfiable.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn misuse_is_not_reported_as_bad_input() {
        let err = StoreError::UnsupportedValueType("view out of bounds".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.validation().is_none());
    }
}
