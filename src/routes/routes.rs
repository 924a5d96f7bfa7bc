//! Defines routes for object operations.
//!
//! - `GET    /healthz`, `GET /readyz` — probes
//! - `PUT    /objects/{*key}` — upload object (conditional headers honoured)
//! - `GET    /objects/{*key}` — download object, `?offset=&length=&suffix=` for ranges
//! - `HEAD   /objects/{*key}` — retrieve metadata only
//! - `DELETE /objects/{*key}` — delete object
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, head_object, put_object},
    },
    services::object_store::ObjectStore,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build the router. The shared `ObjectStore` is supplied via `with_state`.
pub fn routes() -> Router<ObjectStore> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/objects/{*key}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
}
