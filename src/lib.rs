//! Conditional-consistency facade over a key/value object store.
//!
//! [`services::object_store::ObjectStore`] validates keys, values and
//! options, evaluates `onlyIf` preconditions and maps backend records into
//! typed metadata and one-shot bodies. `routes` exposes it over HTTP.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
