//! Schedule CRUD for the admin surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use cortex_core::CortexError;
use cortex_store::{now_rfc3339, Row};

use crate::app::AppState;
use crate::http::error::{ApiError, ApiResult};

const SCHEDULE_TYPES: [&str; 4] = ["interval", "daily", "weekly", "monthly"];

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub schedule_type: Option<String>,
    pub interval_minutes: Option<i64>,
    pub time_of_day: Option<String>,
    pub day_of_week: Option<i64>,
    pub day_of_month: Option<i64>,
    pub enabled: Option<bool>,
}

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    let rows = state
        .store
        .query("SELECT * FROM schedules ORDER BY id", &[])?;
    Ok(Json(rows))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Row>> {
    let row = state
        .store
        .query_one("SELECT * FROM schedules WHERE id = ?1", &[&id])?
        .ok_or(CortexError::NotFound(format!("schedule {id}")))?;
    Ok(Json(row))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleBody>,
) -> ApiResult<(StatusCode, Json<Row>)> {
    let name = body
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or(CortexError::Validation("name is required".into()))?;
    let schedule_type = body
        .schedule_type
        .as_deref()
        .filter(|t| SCHEDULE_TYPES.contains(t))
        .ok_or(CortexError::Validation(
            "type must be one of interval, daily, weekly, monthly".into(),
        ))?;

    let id = state.store.insert(
        "INSERT INTO schedules
         (name, type, interval_minutes, time_of_day, day_of_week, day_of_month,
          enabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        &[
            &name,
            &schedule_type,
            &body.interval_minutes,
            &body.time_of_day,
            &body.day_of_week,
            &body.day_of_month,
            &(body.enabled.unwrap_or(true) as i64),
            &now_rfc3339(),
        ],
    )?;

    let row = state
        .store
        .query_one("SELECT * FROM schedules WHERE id = ?1", &[&id])?
        .ok_or(CortexError::Internal("created schedule vanished".into()))?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<ScheduleBody>,
) -> ApiResult<Json<Row>> {
    let existing = state
        .store
        .query_one("SELECT * FROM schedules WHERE id = ?1", &[&id])?
        .ok_or(CortexError::NotFound(format!("schedule {id}")))?;

    if let Some(ref t) = body.schedule_type {
        if !SCHEDULE_TYPES.contains(&t.as_str()) {
            return Err(ApiError(CortexError::Validation("invalid schedule type".into())));
        }
    }

    let current = |key: &str| existing.get(key).cloned().unwrap_or(Value::Null);
    let name = body
        .name
        .map(Value::from)
        .unwrap_or_else(|| current("name"));
    let schedule_type = body
        .schedule_type
        .map(Value::from)
        .unwrap_or_else(|| current("type"));
    let interval = body
        .interval_minutes
        .map(Value::from)
        .unwrap_or_else(|| current("interval_minutes"));
    let time_of_day = body
        .time_of_day
        .map(Value::from)
        .unwrap_or_else(|| current("time_of_day"));
    let day_of_week = body
        .day_of_week
        .map(Value::from)
        .unwrap_or_else(|| current("day_of_week"));
    let day_of_month = body
        .day_of_month
        .map(Value::from)
        .unwrap_or_else(|| current("day_of_month"));
    let enabled = body
        .enabled
        .map(|b| Value::from(b as i64))
        .unwrap_or_else(|| current("enabled"));

    state.store.exec(
        "UPDATE schedules
         SET name = ?1, type = ?2, interval_minutes = ?3, time_of_day = ?4,
             day_of_week = ?5, day_of_month = ?6, enabled = ?7, updated_at = ?8
         WHERE id = ?9",
        &[
            &cortex_store::sql_param(&name),
            &cortex_store::sql_param(&schedule_type),
            &cortex_store::sql_param(&interval),
            &cortex_store::sql_param(&time_of_day),
            &cortex_store::sql_param(&day_of_week),
            &cortex_store::sql_param(&day_of_month),
            &cortex_store::sql_param(&enabled),
            &now_rfc3339(),
            &id,
        ],
    )?;

    let row = state
        .store
        .query_one("SELECT * FROM schedules WHERE id = ?1", &[&id])?
        .ok_or(CortexError::NotFound(format!("schedule {id}")))?;
    Ok(Json(row))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let affected = state
        .store
        .exec("DELETE FROM schedules WHERE id = ?1", &[&id])?;
    if affected == 0 {
        return Err(ApiError(CortexError::NotFound(format!("schedule {id}"))));
    }
    Ok(StatusCode::NO_CONTENT)
}
