//! API routes for wardend
//!
//! Read-only routes are open. Mutating routes, and the config read that
//! exposes provenance, require the admin credential.

use crate::auth;
use crate::engine::ControlError;
use crate::server::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_common::api::{
    ActionResult, ConfigReadResponse, ConfigWriteResponse, ControlWriteRequest,
    ControlWriteResponse, DeviceTestResponse, HealthResponse, LivenessResponse, ModeStatus,
    StatusResponse, SupervisorStatusResponse, TimelineResponse,
};
use warden_common::config::ConfigEdit;
use warden_common::timeline::clamp_limit;
use warden_common::{HealthState, WardenError, VERSION};

type AppStateArc = Arc<AppState>;

// ============================================================================
// Errors
// ============================================================================

/// Error returned from handlers; always rendered as `{ok: false, error}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ActionResult::failure(self.message))).into_response()
    }
}

impl From<WardenError> for ApiError {
    fn from(e: WardenError) -> Self {
        if e.is_validation() {
            Self::new(StatusCode::BAD_REQUEST, e.to_string())
        } else {
            error!("[API] {}", e);
            Self::internal(e.to_string())
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        let status = match e {
            ControlError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            ControlError::NotWritable(_) => StatusCode::FORBIDDEN,
            ControlError::Blocked(_) | ControlError::NoAddress => StatusCode::CONFLICT,
            ControlError::Device(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        error!("[API] Blocking task failed: {}", e);
        Self::internal("internal error")
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let config = state.engine.config();
    if auth::is_authorized(headers, &config.admin_secret) {
        Ok(())
    } else {
        warn!("[API] Rejected unauthorized request");
        Err(ApiError::unauthorized())
    }
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/health", get(liveness))
        .route("/api/status", get(status))
        .route("/api/device/health", get(device_health))
        .route("/api/mode", get(mode))
        .route("/api/device/timeline", get(timeline))
}

async fn liveness(State(state): State<AppStateArc>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        ok: true,
        version: VERSION.to_string(),
        uptime_secs: state.engine.uptime_secs(),
    })
}

async fn status(State(state): State<AppStateArc>) -> Json<StatusResponse> {
    Json(StatusResponse {
        ok: true,
        version: VERSION.to_string(),
        uptime_secs: state.engine.uptime_secs(),
        mode: state.engine.mode_status(),
        health: state.engine.health(),
    })
}

async fn device_health(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        health: state.engine.health(),
    })
}

async fn mode(State(state): State<AppStateArc>) -> Json<ModeStatus> {
    Json(state.engine.mode_status())
}

#[derive(Debug, Deserialize)]
struct TimelineQuery {
    limit: Option<usize>,
}

async fn timeline(
    State(state): State<AppStateArc>,
    query: Result<Query<TimelineQuery>, QueryRejection>,
) -> ApiResult<TimelineResponse> {
    let Query(query) = query?;
    let limit = clamp_limit(query.limit);
    let engine = state.engine.clone();
    let entries = tokio::task::spawn_blocking(move || engine.timeline(Some(limit))).await??;
    Ok(Json(TimelineResponse {
        ok: true,
        limit,
        entries,
    }))
}

// ============================================================================
// Config Routes
// ============================================================================

pub fn config_routes() -> Router<AppStateArc> {
    Router::new().route("/api/config", get(read_config).post(write_config))
}

async fn read_config(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
) -> ApiResult<ConfigReadResponse> {
    require_admin(&state, &headers)?;

    let store = state.store.clone();
    let (persisted, snapshot) =
        tokio::task::spawn_blocking(move || -> warden_common::Result<_> {
            Ok((store.read()?, store.load()?))
        })
        .await??;

    Ok(Json(ConfigReadResponse {
        ok: true,
        config: persisted,
        effective: snapshot.editable(),
        admin_secret_set: snapshot.has_admin_secret(),
        provenance: snapshot.provenance,
        warnings: snapshot.warnings,
    }))
}

async fn write_config(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
    payload: Result<Json<ConfigEdit>, JsonRejection>,
) -> ApiResult<ConfigWriteResponse> {
    require_admin(&state, &headers)?;
    let Json(edit) = payload?;

    let store = state.store.clone();
    let engine = state.engine.clone();
    let (written, applied) = tokio::task::spawn_blocking(move || -> warden_common::Result<_> {
        let written = store.write(&edit)?;
        let snapshot = store.load()?;
        let applied = engine.apply(snapshot)?;
        Ok((written, applied))
    })
    .await??;

    info!(
        "[API] Configuration saved (mode {} from {:?}/{})",
        written.saved.mode, written.mode_source.layer, written.mode_source.key
    );

    Ok(Json(ConfigWriteResponse {
        ok: true,
        saved: written.saved,
        mode_source: written.mode_source,
        validation_cleared: applied.validation_cleared,
        restart_requested: applied.restart_requested,
    }))
}

// ============================================================================
// Device Routes
// ============================================================================

pub fn device_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/device/test", post(test_device))
        .route("/api/controls", post(write_control))
}

async fn test_device(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
) -> ApiResult<DeviceTestResponse> {
    require_admin(&state, &headers)?;

    let engine = state.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.test_device()).await?;
    let ok = outcome.health.state == HealthState::Ok;
    let error = (!ok).then(|| {
        outcome
            .health
            .last_error
            .clone()
            .unwrap_or_else(|| format!("device health is {}", outcome.health.state))
    });
    Ok(Json(DeviceTestResponse {
        ok,
        health: outcome.health,
        validated: outcome.validated,
        error,
    }))
}

async fn write_control(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
    payload: Result<Json<ControlWriteRequest>, JsonRejection>,
) -> ApiResult<ControlWriteResponse> {
    require_admin(&state, &headers)?;
    let Json(req) = payload?;

    let engine = state.engine.clone();
    let id = req.id.clone();
    let value = tokio::task::spawn_blocking(move || engine.write_control(&id, req.value)).await??;
    Ok(Json(ControlWriteResponse {
        ok: true,
        id: req.id,
        value,
    }))
}

// ============================================================================
// Supervisor Routes
// ============================================================================

pub fn supervisor_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/supervisor/status", get(supervisor_status))
        .route("/api/supervisor/start", post(supervisor_start))
}

async fn supervisor_status(State(state): State<AppStateArc>) -> Json<SupervisorStatusResponse> {
    let units = state.engine.config().engine.supervised_units.clone();
    let mut statuses = Vec::with_capacity(units.len());
    for unit in &units {
        statuses.push(state.systemctl.status(unit).await);
    }
    Json(SupervisorStatusResponse {
        ok: true,
        units: statuses,
    })
}

async fn supervisor_start(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
) -> Result<Json<ActionResult>, ApiError> {
    require_admin(&state, &headers)?;

    let unit = state.engine.config().engine.watchdog_unit.clone();
    info!("[API] Starting {}", unit);
    match state.systemctl.start(&unit).await {
        Ok(()) => Ok(Json(ActionResult::success())),
        Err(e) => {
            error!("[API] Failed to start {}: {}", unit, e);
            Err(ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}
