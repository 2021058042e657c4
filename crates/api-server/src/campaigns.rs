//! Campaign endpoints. Creation persists the campaign and then enqueues the
//! `new-campaign` event that triggers the delivery pipeline.

use crate::rest::{success, ApiError, AppState, PageQuery};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use pulse_broker::publish_json;
use pulse_core::types::{
    Campaign, CampaignStatus, DeliveryMessage, NewCampaign, QUEUE_CAMPAIGN_DELIVERY,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub segment_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// POST /campaigns — validates, persists, and publishes the delivery event.
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("campaign name is required"));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("campaign message is required"));
    }
    if state.segments.get(request.segment_id).await?.is_none() {
        return Err(ApiError::not_found("Segment not found"));
    }

    let status = match request.schedule_time {
        Some(at) if at > Utc::now() => CampaignStatus::Scheduled,
        _ => CampaignStatus::Draft,
    };
    let now = Utc::now();
    let campaign = Campaign {
        id: Uuid::new_v4(),
        name: request.name,
        description: request.description,
        segment_id: request.segment_id,
        message: request.message,
        status,
        schedule_time: request.schedule_time,
        stats: Default::default(),
        created_by: state.system_user,
        tags: request.tags,
        created_at: now,
        updated_at: now,
    };
    let campaign = state.campaigns.insert(campaign).await?;

    publish_json(
        state.broker.as_ref(),
        QUEUE_CAMPAIGN_DELIVERY,
        &DeliveryMessage::NewCampaign(NewCampaign {
            campaign_id: campaign.id,
            segment_id: campaign.segment_id,
            message: campaign.message.clone(),
        }),
    )
    .await?;

    info!(campaign_id = %campaign.id, "Campaign created and queued for delivery");
    Ok((StatusCode::CREATED, success(campaign)))
}

/// GET /campaigns — paginated listing, newest first; stats ride along on
/// each campaign document.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = state.campaigns.list(query.page, query.limit).await?;
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

/// GET /campaigns/:id
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let campaign = state
        .campaigns
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Campaign not found"))?;
    Ok(success(campaign))
}
