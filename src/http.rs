use crate::dashboard::DashboardState;
use crate::metrics::Metrics;
use crate::scheduler::MonitorControl;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<DashboardState>>,
    pub control: Arc<MonitorControl>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToggleResponse {
    pub running: bool,
    pub changed: bool,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    state: Arc<RwLock<DashboardState>>,
    control: Arc<MonitorControl>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .route("/api/monitoring/start", post(start_handler))
        .route("/api/monitoring/stop", post(stop_handler))
        .with_state(HttpAppState {
            metrics,
            state,
            control,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(guard.clone())
}

async fn start_handler(State(state): State<HttpAppState>) -> Json<ToggleResponse> {
    let changed = state.control.start();
    if changed {
        info!("monitoring start requested");
    }
    Json(ToggleResponse {
        running: state.control.is_running(),
        changed,
    })
}

async fn stop_handler(State(state): State<HttpAppState>) -> Json<ToggleResponse> {
    let changed = state.control.stop();
    if changed {
        info!("monitoring stop requested");
    }
    Json(ToggleResponse {
        running: state.control.is_running(),
        changed,
    })
}
