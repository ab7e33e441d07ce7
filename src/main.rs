//! Slot exchange - trade reserved weekly sessions through a chat bot
//!
//! A Rust backend implementing a stateless command protocol over a
//! transactional SQLite ledger of offers and claims.

mod api;
mod board;
mod catalog;
mod config;
mod db;
mod ledger;
mod protocol;

use api::{create_router, AppState};
use catalog::{reconcile, CatalogConfig, CatalogError};
use config::AppConfig;
use db::Database;
use ledger::Ledger;
use protocol::{Dispatcher, SystemClock};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slot_exchange=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize database
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // Reconcile the static catalog
    tracing::info!(path = %config.catalog_path.display(), "Loading catalog");
    let catalog = match CatalogConfig::load(&config.catalog_path) {
        Ok(catalog) => catalog,
        Err(CatalogError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            tracing::warn!("Catalog file not found, starting with the stored catalog");
            CatalogConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    reconcile(&db, &catalog)?;

    let dispatcher = Dispatcher::new(Ledger::new(db), Arc::new(SystemClock), config.about)?;
    let app = create_router(AppState::new(dispatcher));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Slot exchange listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
