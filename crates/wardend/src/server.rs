//! HTTP server for wardend

use crate::engine::Engine;
use crate::routes;
use anyhow::{Context, Result};
use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use warden_common::api::ActionResult;
use warden_common::systemd::Systemctl;
use warden_common::ConfigStore;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Engine,
    pub store: Arc<ConfigStore>,
    pub systemctl: Systemctl,
}

impl AppState {
    pub fn new(engine: Engine, store: Arc<ConfigStore>) -> Self {
        Self {
            engine,
            store,
            systemctl: Systemctl::default(),
        }
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("[API] Handler panicked: {}", detail);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ActionResult::failure("internal error")),
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::config_routes())
        .merge(routes::device_routes())
        .merge(routes::supervisor_routes())
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until the process is stopped
pub async fn run(state: AppState, addr: &str) -> Result<()> {
    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
