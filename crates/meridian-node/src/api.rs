//! HTTP API server for the Meridian node.
//!
//! Serves the CCP endpoints peers post route messages to, plus read-only
//! endpoints for health, routing status and address resolution.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use meridian_core::AccountId;
use meridian_routing::{Route, RouteControlRequest, RouteUpdateRequest, RoutingError, RoutingHandle, RoutingStatus};

use crate::transport::ACCOUNT_HEADER;

/// State shared by all HTTP handlers.
pub struct ApiState {
    pub routing: RoutingHandle,
    pub own_address: String,
    pub start_time: Instant,
}

// --- Response types ---

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub address: String,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub address: String,
    pub route: Route,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn routing_error(err: RoutingError) -> ApiError {
    let status = match err {
        RoutingError::NotAPeer { .. }
        | RoutingError::NotSendingRoutes { .. }
        | RoutingError::NotReceivingRoutes { .. } => StatusCode::FORBIDDEN,
        RoutingError::ServiceStopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn sender_account(headers: &HeaderMap) -> Result<AccountId, ApiError> {
    let value = headers
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, format!("missing {} header", ACCOUNT_HEADER)))?;
    AccountId::new(value).map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

// --- Handlers ---

async fn handle_health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        address: state.own_address.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn handle_route_control(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<RouteControlRequest>,
) -> Result<StatusCode, ApiError> {
    let from = sender_account(&headers)?;
    tracing::trace!(account = %from, mode = %req.mode, "received route control");
    state
        .routing
        .handle_route_control(from, req)
        .await
        .map_err(routing_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_route_update(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<RouteUpdateRequest>,
) -> Result<StatusCode, ApiError> {
    let from = sender_account(&headers)?;
    tracing::trace!(
        account = %from,
        from_epoch = req.from_epoch_index,
        to_epoch = req.to_epoch_index,
        "received route update"
    );
    state
        .routing
        .handle_route_update(from, req)
        .await
        .map_err(routing_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_routes(State(state): State<Arc<ApiState>>) -> Result<Json<RoutingStatus>, ApiError> {
    state.routing.status().await.map(Json).map_err(routing_error)
}

async fn handle_resolve(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> Result<Json<ResolveResponse>, ApiError> {
    match state.routing.resolve(&address) {
        Some(route) => Ok(Json(ResolveResponse { address, route })),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("no route to {}", address),
        )),
    }
}

// --- Server ---

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ccp/route-control", post(handle_route_control))
        .route("/ccp/route-update", post(handle_route_update))
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/routes", get(handle_routes))
        .route("/api/v1/resolve/{address}", get(handle_resolve))
        .with_state(state)
}

pub async fn start_api_server(listen_addr: SocketAddr, state: Arc<ApiState>) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "HTTP API server started");
    axum::serve(listener, app).await?;
    Ok(())
}
