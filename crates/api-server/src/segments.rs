//! Segment endpoints: creation and update with synchronous re-evaluation of
//! the cached customer count, plus the stateless rule-set preview.

use crate::rest::{success, ApiError, AppState, PageQuery};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use pulse_core::types::{Group, GroupLogic, Rule, Segment};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSegmentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rules: Vec<Rule>,
    pub groups: Vec<Group>,
    #[serde(default)]
    pub rule_logic: GroupLogic,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// POST /segments — validates rule/group references, evaluates the segment
/// against the full customer base, and persists it with the cached count.
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateSegmentRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("segment name is required"));
    }
    pulse_segmentation::validate(&request.rules, &request.groups)?;

    let now = Utc::now();
    let mut segment = Segment {
        id: Uuid::new_v4(),
        name: request.name,
        description: request.description,
        rules: request.rules,
        groups: request.groups,
        rule_logic: request.rule_logic,
        customer_count: 0,
        created_by: state.system_user,
        last_evaluated: None,
        tags: request.tags,
        created_at: now,
        updated_at: now,
    };

    let customers = state.customers.all().await?;
    segment.customer_count = pulse_segmentation::compute_count(&segment, &customers).count;
    segment.last_evaluated = Some(Utc::now());

    let segment = state.segments.insert(segment).await?;
    Ok((StatusCode::CREATED, success(segment)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSegmentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Option<Vec<Rule>>,
    #[serde(default)]
    pub groups: Option<Vec<Group>>,
    #[serde(default)]
    pub rule_logic: Option<GroupLogic>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// PUT /segments/:id — partial update; a change to rules or groups
/// revalidates references and recomputes the cached count synchronously.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSegmentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut segment = state
        .segments
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Segment not found"))?;

    let rules_changed = request.rules.is_some() || request.groups.is_some();

    if let Some(name) = request.name {
        segment.name = name;
    }
    if let Some(description) = request.description {
        segment.description = Some(description);
    }
    if let Some(rules) = request.rules {
        segment.rules = rules;
    }
    if let Some(groups) = request.groups {
        segment.groups = groups;
    }
    if let Some(rule_logic) = request.rule_logic {
        segment.rule_logic = rule_logic;
    }
    if let Some(tags) = request.tags {
        segment.tags = tags;
    }

    if rules_changed {
        pulse_segmentation::validate(&segment.rules, &segment.groups)?;
        let customers = state.customers.all().await?;
        segment.customer_count = pulse_segmentation::compute_count(&segment, &customers).count;
        segment.last_evaluated = Some(Utc::now());
    }
    segment.updated_at = Utc::now();

    let segment = state.segments.update(segment).await?;
    Ok(success(segment))
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub rule_logic: GroupLogic,
}

/// POST /segments/preview — stateless evaluation of a candidate rule set;
/// nothing is persisted.
pub async fn preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.rules.is_empty() {
        return Err(ApiError::bad_request("rules array is required"));
    }
    if !request.groups.is_empty() {
        pulse_segmentation::validate(&request.rules, &request.groups)?;
    }
    let customers = state.customers.all().await?;
    let result = pulse_segmentation::preview(
        &request.rules,
        &request.groups,
        request.rule_logic,
        &customers,
    );
    Ok(success(result))
}

/// GET /segments — paginated listing, newest first.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = state.segments.list(query.page, query.limit).await?;
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

/// GET /segments/:id
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let segment = state
        .segments
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Segment not found"))?;
    Ok(success(segment))
}
