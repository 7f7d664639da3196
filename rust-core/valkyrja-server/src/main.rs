//! # Valkyrja Server
//!
//! `valkyrja [config.toml]`
//!
//! Without an argument, `valkyrja.toml` in the working directory is read
//! when present. `VALKYRJA_*` environment variables override the file.

mod targets;

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use valkyrja_core::config::AppConfig;
use valkyrja_core::{init_tracing, DatabasePool, Middlewares, RequestHandler, Server, SqlRepository};

const DEFAULT_CONFIG: &str = "valkyrja.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(path.as_deref())?;
    init_tracing(&config.log);

    let collection = config
        .routes
        .collection()
        .context("failed to build route table")?;
    info!(routes = collection.len(), debug = config.debug, "Route table ready");

    let mut middlewares = Middlewares::with_defaults();
    if let Some(auth) = &config.auth {
        middlewares = middlewares.with_jwt_auth(&auth.secret);
    }

    let mut handler = RequestHandler::new(Arc::new(collection), targets::dispatcher())
        .with_middlewares(middlewares)
        .with_debug(config.debug);

    let pool = match &config.database {
        Some(database) => {
            let pool = DatabasePool::connect(&database.url, database.max_connections)
                .await
                .context("failed to connect to database")?;
            handler = handler.with_repository(Arc::new(SqlRepository::new(pool.clone())));
            Some(pool)
        }
        None => {
            warn!("No database configured, entity parameters cannot be resolved");
            None
        }
    };

    Server::new(config.server.clone(), handler).serve().await?;

    if let Some(pool) = pool {
        pool.close().await;
    }
    info!("Server stopped");
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG));
    if path.exists() {
        return AppConfig::load(path).with_context(|| format!("failed to load {}", path.display()));
    }
    if path != Path::new(DEFAULT_CONFIG) {
        anyhow::bail!("config file {} not found", path.display());
    }

    let mut config = AppConfig::default();
    config.apply_env_from(std::env::vars())?;
    Ok(config)
}
