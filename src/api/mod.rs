//! HTTP API for health checks, status, and inspection

use crate::batch::{BatchCoordinator, BatchStats, TransactionBatch};
use crate::bridge::{BridgeStats, BridgeStatus, ChainId, CrossChainTransaction, TransferOrchestrator};
use crate::config::ApiConfig;
use crate::consensus::Validator;
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::security::{PauseInfo, SecurityEvent, SecurityStats};
use crate::state::BridgeRepository;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

const DEFAULT_EVENT_LIMIT: usize = 100;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransferOrchestrator>,
    pub batches: Arc<BatchCoordinator>,
    pub repository: Arc<dyn BridgeRepository>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<TransferOrchestrator>,
        batches: Arc<BatchCoordinator>,
        repository: Arc<dyn BridgeRepository>,
    ) -> Self {
        Self {
            orchestrator,
            batches,
            repository,
            started_at: Utc::now(),
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/stats", get(get_stats))
        .route("/transactions/:id", get(get_transaction))
        .route("/batches/:id", get(get_batch))
        .route("/validators", get(get_validators))
        .route("/security/events", get(get_security_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> BridgeResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::Config(format!("Failed to bind API server to {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .await
        .map_err(|e| BridgeError::Internal(format!("API server error: {}", e)))?;

    Ok(())
}

/// Error body with a status derived from the error kind
struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::State => StatusCode::CONFLICT,
            ErrorKind::Security | ErrorKind::Limit => StatusCode::FORBIDDEN,
            ErrorKind::Consensus => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Config | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind: kind.as_str(),
            }),
        )
            .into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - repository reachable and enough validators for a quorum
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let repository = state.repository.health_check().await.is_ok();

    let consensus = state.orchestrator.consensus();
    let (_, active) = consensus.validator_counts().await;
    let quorum = active >= consensus.required_confirmations();

    let status = if repository && quorum {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready: repository && quorum,
            repository,
            quorum,
            active_validators: active,
        }),
    )
}

/// Get bridge status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let security = state.orchestrator.security();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds().max(0) as u64,
        bridge_status: state.orchestrator.status().await,
        emergency_pause: security.pause_info().await,
        supported_chains: state.orchestrator.supported_chains(),
        required_confirmations: state.orchestrator.consensus().required_confirmations(),
    })
}

/// Get bridge, batch and security statistics
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        bridge: state.orchestrator.stats().await,
        batches: state.batches.stats().await,
        security: state.orchestrator.security().stats().await,
    })
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CrossChainTransaction>, ApiError> {
    Ok(Json(state.orchestrator.get_transaction(&id).await?))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransactionBatch>, ApiError> {
    Ok(Json(state.batches.get_batch(&id).await?))
}

async fn get_validators(State(state): State<AppState>) -> Json<Vec<Validator>> {
    Json(state.orchestrator.consensus().validators().await)
}

async fn get_security_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<SecurityEvent>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(state.orchestrator.security().security_events(limit).await)
}

// Request and response types

#[derive(Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    repository: bool,
    quorum: bool,
    active_validators: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    bridge_status: BridgeStatus,
    emergency_pause: Option<PauseInfo>,
    supported_chains: Vec<ChainId>,
    required_confirmations: usize,
}

#[derive(Serialize)]
struct StatsResponse {
    bridge: BridgeStats,
    batches: BatchStats,
    security: SecurityStats,
}
