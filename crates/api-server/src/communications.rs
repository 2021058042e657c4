//! Delivery-log endpoints: the vendor receipt callback and per-campaign
//! delivery statistics.

use crate::rest::{success, ApiError, AppState};
use axum::extract::{Path, State};
use axum::Json;
use pulse_core::types::{CommunicationLog, VendorReceipt};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// POST /communications/receipt — vendor delivery receipt intake, the HTTP
/// twin of the `delivery-receipt` queue consumer. No auth: this is the
/// vendor's callback URL.
pub async fn receipt(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.get("message_id").is_none() || body.get("status").is_none() {
        return Err(ApiError::bad_request("message_id and status are required"));
    }
    let receipt: VendorReceipt = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("malformed receipt: {e}")))?;

    let log = state.reconciler.apply_vendor_receipt(receipt).await?;
    Ok(success(log))
}

#[derive(Debug, Serialize)]
pub struct StatusEntry {
    pub count: u64,
    pub percentage: f64,
}

/// Per-status counts with two-decimal percentages.
pub fn status_breakdown(logs: &[CommunicationLog]) -> (u64, HashMap<String, StatusEntry>) {
    let total = logs.len() as u64;
    let mut counts: HashMap<String, u64> = HashMap::new();
    for log in logs {
        let key = serde_json::to_value(log.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", log.status));
        *counts.entry(key).or_default() += 1;
    }
    let stats = counts
        .into_iter()
        .map(|(status, count)| {
            let percentage = if total == 0 {
                0.0
            } else {
                (count as f64 / total as f64 * 10_000.0).round() / 100.0
            };
            (status, StatusEntry { count, percentage })
        })
        .collect();
    (total, stats)
}

/// GET /communications/stats/:campaign_id — status-count aggregation across
/// the campaign's logs, plus the campaign's own rolled-up counters.
pub async fn stats(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let campaign = state
        .campaigns
        .get(campaign_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Campaign not found"))?;
    let logs = state.logs.find_by_campaign(campaign_id).await?;
    let (total, stats) = status_breakdown(&logs);

    Ok(success(json!({
        "total": total,
        "stats": stats,
        "campaign": campaign.stats,
    })))
}

/// GET /communications/campaign/:campaign_id — the campaign's delivery
/// logs, newest first.
pub async fn list_for_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let logs = state.logs.find_by_campaign(campaign_id).await?;
    Ok(success(logs))
}
