//! Capture ingress, clarification resolution, audit log reads, and the web
//! notification queue.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use cortex_core::{ChannelContext, ChannelKind, CortexError};
use cortex_store::Row;

use crate::app::AppState;
use crate::http::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct InboxBody {
    pub text: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Confirmation round trip for critical edits.
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub pending_action: Option<Value>,
}

pub async fn inbox(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InboxBody>,
) -> ApiResult<Json<Value>> {
    let channel = match body.channel.as_deref() {
        None => ChannelKind::Web,
        Some(raw) => ChannelKind::from_str(raw)
            .map_err(|e| CortexError::Validation(e))?,
    };
    let ctx = ChannelContext::new(channel, body.channel_id);

    let result = state
        .pipeline
        .process(&body.text, &ctx, body.confirmed, body.pending_action)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ClarificationBody {
    pub choice: String,
}

pub async fn respond_clarification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<ClarificationBody>,
) -> ApiResult<Json<Value>> {
    let result = state
        .pipeline
        .respond_to_clarification(id, &body.choice)
        .await?;
    Ok(Json(result))
}

pub async fn pending_clarifications(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<cortex_pipeline::HumanRequest>>> {
    Ok(Json(state.pipeline.hitl().get_pending()?))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
}

pub async fn inbox_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Vec<Row>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let rows = state.store.query(
        "SELECT * FROM inbox_log ORDER BY created_at DESC LIMIT ?1",
        &[&limit],
    )?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub channel_id: Option<String>,
}

/// Drain queued web notifications for a session.
pub async fn notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<Vec<String>>> {
    let key = query.channel_id.unwrap_or_else(|| "web".to_string());
    let pending = state
        .web_notifications
        .remove(&key)
        .map(|(_, messages)| messages)
        .unwrap_or_default();
    Ok(Json(pending))
}
