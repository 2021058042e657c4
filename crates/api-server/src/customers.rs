//! Customer endpoints: direct creation, asynchronous bulk ingestion, and
//! paginated reads.

use crate::rest::{success, ApiError, AppState, PageQuery};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use pulse_broker::publish_json;
use pulse_core::types::{Customer, CustomerDraft, IngestionMessage, QUEUE_CUSTOMER_INGESTION};
use pulse_pipeline::ingestion::validate_draft;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// POST /customers — synchronous single insert.
pub async fn create(
    State(state): State<AppState>,
    Json(draft): Json<CustomerDraft>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    validate_draft(&draft)?;
    let customer = state.customers.insert(Customer::from_draft(draft)).await?;
    Ok((StatusCode::CREATED, success(customer)))
}

#[derive(Debug, Deserialize)]
pub struct BulkCreateRequest {
    pub customers: Vec<CustomerDraft>,
}

/// POST /customers/bulk — accepted for asynchronous processing through the
/// `customer-ingestion` queue; per-record failures surface in the consumer
/// logs, not here.
pub async fn bulk_create(
    State(state): State<AppState>,
    Json(request): Json<BulkCreateRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if request.customers.is_empty() {
        return Err(ApiError::bad_request("customers must be a non-empty array"));
    }
    publish_json(
        state.broker.as_ref(),
        QUEUE_CUSTOMER_INGESTION,
        &IngestionMessage::BulkCreate(request.customers),
    )
    .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": "Bulk customer creation request accepted"
        })),
    ))
}

/// GET /customers — paginated listing, newest first.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = state.customers.list(query.page, query.limit).await?;
    Ok(Json(json!({
        "success": true,
        "data": page.data,
        "pagination": {
            "page": page.page,
            "limit": page.limit,
            "total": page.total,
            "pages": page.pages,
        }
    })))
}

/// GET /customers/:id
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let customer = state
        .customers
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Customer not found"))?;
    Ok(success(customer))
}
