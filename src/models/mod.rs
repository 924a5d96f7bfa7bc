//! Core data models for the conditional object store.
//!
//! `object` holds what the store returns (typed metadata, one-shot bodies) and
//! what backends persist (wire metadata, raw records). `options` and `value`
//! describe what callers pass in.

pub mod object;
pub mod options;
pub mod value;
