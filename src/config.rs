use crate::services::object_store::MAX_VALUE_SIZE;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::env;

/// Which storage backend the server fronts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// SQLite metadata plus payload files on local disk.
    Sqlite,
    /// Process memory; contents are lost on exit.
    Memory,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub storage_dir: String,
    pub database_url: String,
    pub max_connections: u32,
    pub max_value_size: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Conditional object store API")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides OBJECT_STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Directory where object payloads are stored (overrides OBJECT_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted object in bytes (overrides OBJECT_STORE_MAX_VALUE_SIZE)
    #[arg(long)]
    pub max_value_size: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::merge(Args::parse())
    }

    /// Merge parsed CLI args over the environment.
    pub fn merge(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("OBJECT_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed("OBJECT_STORE_PORT", 3000u16)?;
        let env_backend = match env::var("OBJECT_STORE_BACKEND") {
            Ok(value) => BackendKind::from_str(&value, true).map_err(|e| {
                anyhow::anyhow!("parsing OBJECT_STORE_BACKEND value `{}`: {}", value, e)
            })?,
            Err(_) => BackendKind::Sqlite,
        };
        let env_storage =
            env::var("OBJECT_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("OBJECT_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/object_store.db".into());
        let max_connections = env_parsed("OBJECT_STORE_MAX_CONNECTIONS", 5u32)?;
        let env_max_value = env_parsed("OBJECT_STORE_MAX_VALUE_SIZE", MAX_VALUE_SIZE)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            max_connections,
            max_value_size: args.max_value_size.unwrap_or(env_max_value),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
