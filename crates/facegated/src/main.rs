use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod orchestrator;
mod session;
mod store;

use config::Config;
use dbus_interface::{FacegateService, BUS_NAME, OBJECT_PATH};
use orchestrator::Orchestrator;
use store::FaceStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        db_path = %config.db_path.display(),
        match_threshold = config.match_threshold,
        session_bus = config.session_bus,
        "configuration loaded"
    );

    let models = engine::Models::load(&config.model_paths()).context("failed to load models")?;
    let engine = engine::spawn_engine(
        models,
        config.services(),
        Duration::from_secs(config.request_timeout_secs),
    )?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = FaceStore::open(&config.db_path)
        .await
        .context("failed to open face store")?;
    tracing::info!(
        users = store.count_users().await?,
        signatures = store.count_signatures().await?,
        "face store opened"
    );

    let session_bus = config.session_bus;
    let service = FacegateService {
        orchestrator: Arc::new(Orchestrator::new(config, engine, store)),
    };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus_name = BUS_NAME, "facegated ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
