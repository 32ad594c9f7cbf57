use crate::{
    dispatcher::Dispatcher,
    ledger::LoanRecord,
    types::{ApiResponse, MonitoringConfig},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

/// Health check and ledger lookups. Not part of message dispatch.
pub struct MonitoringServer {
    config: MonitoringConfig,
    dispatcher: Arc<Dispatcher>,
}

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
}

impl MonitoringServer {
    pub fn new(config: MonitoringConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    /// Start the monitoring server
    pub async fn start(&self) -> Result<(), std::io::Error> {
        let addr = format!("0.0.0.0:{}", self.config.health_check_port);
        let listener = TcpListener::bind(&addr).await?;

        info!("Monitoring server listening on http://{}", addr);
        info!("  GET|POST /health - Health check");
        info!("  GET  /loans/:source_tx_hash - Loan document");
        info!("  GET  /api/v1/status - Relayer metrics");

        axum::serve(listener, router(Arc::clone(&self.dispatcher))).await
    }
}

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", get(health_check).post(health_check))
        .route("/health", get(health_check).post(health_check))
        .route("/loans/:source_tx_hash", get(loan_details))
        .route("/api/v1/status", get(relayer_status))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(AppState { dispatcher })
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "OK" }))
}

async fn loan_details(
    State(state): State<AppState>,
    Path(source_tx_hash): Path<String>,
) -> impl IntoResponse {
    match state.dispatcher.ledger().get(&source_tx_hash).await {
        Ok(Some(record)) => (StatusCode::OK, Json(ApiResponse::success(record))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<LoanRecord>::error(format!("No loan for {}", source_tx_hash))),
        ),
        Err(e) => {
            error!(key = %source_tx_hash, "Ledger lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<LoanRecord>::error(format!("Ledger lookup failed: {}", e))),
            )
        }
    }
}

async fn relayer_status(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.dispatcher.get_metrics().await;
    let health = state.dispatcher.check_health().await;

    let chains: serde_json::Map<String, serde_json::Value> = health
        .into_iter()
        .map(|(chain_id, healthy)| (chain_id.to_string(), serde_json::Value::Bool(healthy)))
        .collect();

    Json(ApiResponse::success(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "metrics": metrics,
        "chains": chains,
    })))
}
