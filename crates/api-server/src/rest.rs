//! Shared REST plumbing: application state, the response envelope, and the
//! operational probe endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pulse_broker::MessageBroker;
use pulse_core::PulseError;
use pulse_pipeline::ReceiptReconciler;
use pulse_store::{CampaignStore, CommunicationLogStore, CustomerStore, SegmentStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;
use uuid::Uuid;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn MessageBroker>,
    pub customers: Arc<dyn CustomerStore>,
    pub segments: Arc<dyn SegmentStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub logs: Arc<dyn CommunicationLogStore>,
    pub reconciler: Arc<ReceiptReconciler>,
    /// Acting user for created records until the auth collaborator is wired
    /// in front of this service.
    pub system_user: Uuid,
    pub node_id: String,
    pub start_time: Instant,
}

/// Success envelope: `{"success": true, "data": ...}`.
pub fn success<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Failure envelope carried by every error response. Internal details are
/// logged, never returned to the collaborator boundary.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        metrics::counter!("api.validation_errors").increment(1);
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        metrics::counter!("api.errors").increment(1);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal processing error".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(json!({ "success": false, "message": self.message })),
        )
            .into_response()
    }
}

impl From<PulseError> for ApiError {
    fn from(e: PulseError) -> Self {
        match e {
            PulseError::Validation(message) => ApiError::bad_request(message),
            PulseError::NotFound(kind, _) => ApiError::not_found(format!("{kind} not found")),
            other => {
                error!(error = %other, "Request failed");
                ApiError::internal()
            }
        }
    }
}

/// `?page=&limit=` listing parameters.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}
fn default_limit() -> usize {
    10
}

/// GET /health — health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "node_id": state.node_id,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// GET /ready — readiness probe.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.start_time.elapsed().as_secs() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live — liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
