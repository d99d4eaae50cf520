mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use weldiwin_api::auth::{AppState, AppStateInner};
use weldiwin_api::{notify, oauth, uploads};
use weldiwin_core::Services;
use weldiwin_gateway::Gateway;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weldiwin=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = weldiwin_db::Database::open(&config.db_path)?;
    let services = Services::new(Arc::new(db), config.store_timeout);

    let mut state = AppStateInner::new(services.clone(), config.jwt_secret.clone());
    state.gateway = Gateway::new(services, config.enforce_membership);
    state.token_ttl = config.token_ttl;
    state.notifier = notify::notifier(config.notify_webhook_url.as_deref());
    state.uploader = uploads::audio_uploader(config.cloudinary_url.as_deref());
    state.verifier = oauth::identity_verifier(config.google_client_id.as_deref());

    info!(
        "Notifications: {}, audio storage: {}, Google login: {}, gateway membership check: {}",
        if state.notifier.configured() { "webhook" } else { "log only" },
        if state.uploader.configured() { "cloudinary" } else { "inline data URLs" },
        if state.verifier.configured() { "enabled" } else { "disabled" },
        config.enforce_membership,
    );
    let state: AppState = Arc::new(state);

    let app = weldiwin_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("WeldiWin server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
