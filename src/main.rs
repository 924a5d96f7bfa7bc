use anyhow::Result;
use axum::Router;
use conditional_store::{
    config::{AppConfig, BackendKind},
    routes::routes::routes,
    services::{
        backend::{MemoryBackend, SqliteBackend, StorageBackend},
        object_store::ObjectStore,
    },
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting conditional-store with config: {:?}", cfg);

    // --- Initialize backend ---
    let backend: Arc<dyn StorageBackend> = match cfg.backend {
        BackendKind::Sqlite => {
            let sqlite = SqliteBackend::connect(
                &cfg.database_url,
                cfg.storage_dir.clone(),
                cfg.max_connections,
            )
            .await?;
            sqlite.migrate().await?;

            // --- Handle migration mode ---
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(sqlite)
        }
        BackendKind::Memory => {
            if migrate {
                tracing::warn!("--migrate has no effect on the memory backend");
                return Ok(());
            }
            tracing::warn!("Using the in-memory backend; objects are lost on exit");
            Arc::new(MemoryBackend::new())
        }
    };

    // --- Initialize facade ---
    let store = ObjectStore::new(backend).with_max_value_size(cfg.max_value_size);

    // --- Build router ---
    let app: Router = routes().with_state(store);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
