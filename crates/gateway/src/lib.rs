//! HTTP API gateway for Bizpilot.
//!
//! Exposes a health check and the v1 API: chat turns, conversation
//! management, action execution, intent detection and cross-domain search.
//!
//! Built on Axum.

pub mod api_v1;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use bizpilot_assistant::ChatService;
use bizpilot_config::{AppConfig, GatewayConfig};
use bizpilot_store::SqliteStore;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use api_v1::{ApiState, OWNER_HEADER, SharedApiState};

/// Origin of the bundled web client during local development.
const DEV_ORIGIN: &str = "http://localhost:3000";

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - CORS for the local web client
/// - Request body size limit from `gateway.body_limit_bytes`
/// - HTTP trace logging
pub fn build_router(state: SharedApiState, config: &GatewayConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static(DEV_ORIGIN))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(OWNER_HEADER)])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the gateway server.
///
/// Opens the SQLite database (running migrations), builds the configured
/// model provider and serves until the process is stopped.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let store = Arc::new(
        SqliteStore::with_max_connections(&config.database.url, config.database.max_connections)
            .await?,
    );

    let provider = bizpilot_providers::build_from_config(&config.llm)?;
    if !config.has_api_key() {
        warn!("No API key configured; model calls will fail and replies will use the fallback text");
    }

    let chat = ChatService::new(
        store.clone(),
        store,
        provider,
        &config.llm,
        &config.assistant,
    );
    let app = build_router(Arc::new(ApiState::new(chat)), &config.gateway);

    info!(addr = %addr, model = %config.llm.model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
