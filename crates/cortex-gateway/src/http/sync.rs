//! Sync admin reads: per-provider status and the sync log.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use cortex_store::Row;

use crate::app::AppState;
use crate::http::error::ApiResult;

pub async fn status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    let rows = state.store.query(
        "SELECT provider, enabled, sync_interval, last_sync, write_calendar_id
         FROM sync_config ORDER BY provider",
        &[],
    )?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
}

pub async fn logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Vec<Row>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let rows = state.store.query(
        "SELECT * FROM sync_log ORDER BY created_at DESC LIMIT ?1",
        &[&limit],
    )?;
    Ok(Json(rows))
}
