#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dealer_adapter::{AdapterConfig, AdapterError, AdapterRuntime, AssetWriteRequest};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AdapterConfig::from_env();
    let addr: SocketAddr = config.bind.parse()?;
    let runtime = Arc::new(AdapterRuntime::from_config(&config)?);

    let app = router(runtime);

    info!(
        %addr,
        persistence_enabled = config.persistence_enabled,
        journal = %config.journal_path.display(),
        "dealer_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(runtime: Arc<AdapterRuntime>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/assets", post(create_asset).get(list_assets))
        .route(
            "/api/assets/:id",
            get(read_asset).put(update_asset).delete(delete_asset),
        )
        .route("/api/assets/history/:id", get(asset_history))
        .with_state(runtime)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("dealer_adapter_http shutting down");
}

fn error_response(err: AdapterError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(kind = err.kind(), error = %err, "request failed");
    }
    (status, Json(err.to_response())).into_response()
}

/// Body rejections answer 400 in the adapter's error shape instead of axum's
/// plain-text 4xx.
fn write_request(
    payload: Result<Json<AssetWriteRequest>, JsonRejection>,
) -> Result<AssetWriteRequest, AdapterError> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| AdapterError::BadRequest(rejection.body_text()))
}

async fn healthz(State(runtime): State<Arc<AdapterRuntime>>) -> Response {
    match runtime.health() {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn create_asset(
    State(runtime): State<Arc<AdapterRuntime>>,
    payload: Result<Json<AssetWriteRequest>, JsonRejection>,
) -> Response {
    match write_request(payload).and_then(|request| runtime.create_asset(request)) {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_assets(State(runtime): State<Arc<AdapterRuntime>>) -> Response {
    match runtime.list_assets() {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn read_asset(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(id): Path<String>,
) -> Response {
    match runtime.read_asset(&id) {
        // The stored encoding is already JSON.
        Ok(raw) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            raw,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_asset(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(id): Path<String>,
    payload: Result<Json<AssetWriteRequest>, JsonRejection>,
) -> Response {
    match write_request(payload).and_then(|request| runtime.update_asset(&id, request)) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_asset(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(id): Path<String>,
) -> Response {
    match runtime.delete_asset(&id) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn asset_history(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(id): Path<String>,
) -> Response {
    match runtime.asset_history(&id) {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => error_response(err),
    }
}
