//! Status API for scalerd.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness probe |
//! | GET | `/api/v1/scalers` | Status of every scaler |
//! | GET | `/api/v1/scalers/{id}` | Status of one scaler |
//! | GET | `/api/v1/leases` | Leases known to the lock service |

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use scaler_engine::{LockService, ScalerManager};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<ScalerManager>,
    pub leases: Arc<dyn LockService>,
}

/// Build the status router.
pub fn build_router(manager: Arc<ScalerManager>, leases: Arc<dyn LockService>) -> Router {
    let state = ApiState { manager, leases };

    let api_routes = Router::new()
        .route("/scalers", get(list_scalers))
        .route("/scalers/{id}", get(get_scaler))
        .route("/leases", get(list_leases))
        .with_state(state);

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/v1", api_routes)
}

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// GET /healthz
async fn healthz() -> &'static str {
    "ok"
}

// ── Scalers ────────────────────────────────────────────────────

/// GET /api/v1/scalers
async fn list_scalers(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.manager.status().await)
}

/// GET /api/v1/scalers/{id}
async fn get_scaler(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.status_of(&id).await {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("scaler not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Leases ─────────────────────────────────────────────────────

/// GET /api/v1/leases
async fn list_leases(State(state): State<ApiState>) -> impl IntoResponse {
    match state.leases.leases().await {
        Ok(leases) => ApiResponse::ok(leases).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}
