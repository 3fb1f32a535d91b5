//! Callback Gateway
//!
//! Thin HTTP surface: the custody webhook and a health check. All deposit logic
//! lives behind [`crate::custody::CustodyCallbackHandler`].

pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub use state::AppState;
pub use types::{ApiResponse, error_codes};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/custody/callback", post(handlers::custody_callback))
        .route("/v1/health", get(handlers::health_check))
        .with_state(state)
}

/// Start HTTP Gateway server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("Gateway server error: {}", e))
}
