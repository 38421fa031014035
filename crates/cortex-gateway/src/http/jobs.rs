//! Scheduled-job admin: list with schedule names, enable/reassign, manual
//! one-shot runs.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use cortex_core::CortexError;
use cortex_store::{now_rfc3339, Row, RowExt};

use crate::app::AppState;
use crate::http::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct JobUpdateBody {
    pub enabled: Option<bool>,
    pub schedule_id: Option<i64>,
}

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    Ok(Json(state.scheduler.list_jobs()?))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<JobUpdateBody>,
) -> ApiResult<Json<Row>> {
    let existing = state
        .store
        .query_one("SELECT * FROM scheduled_jobs WHERE id = ?1", &[&id])?
        .ok_or(CortexError::NotFound(format!("job {id}")))?;

    let enabled = body
        .enabled
        .map(|b| b as i64)
        .or_else(|| existing.i64_opt("enabled"))
        .unwrap_or(1);
    let schedule_id = body.schedule_id.or_else(|| existing.i64_opt("schedule_id"));

    if let Some(schedule_id) = schedule_id {
        let known = state
            .store
            .query_one("SELECT id FROM schedules WHERE id = ?1", &[&schedule_id])?;
        if known.is_none() {
            return Err(ApiError(CortexError::Validation(format!(
                "unknown schedule_id {schedule_id}"
            ))));
        }
    }

    // A reconfigured job gets its next_run replanned on the next tick.
    state.store.exec(
        "UPDATE scheduled_jobs
         SET enabled = ?1, schedule_id = ?2, next_run = NULL, updated_at = ?3
         WHERE id = ?4",
        &[&enabled, &schedule_id, &now_rfc3339(), &id],
    )?;

    let row = state
        .store
        .query_one("SELECT * FROM scheduled_jobs WHERE id = ?1", &[&id])?
        .ok_or(CortexError::NotFound(format!("job {id}")))?;
    Ok(Json(row))
}

pub async fn run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<cortex_scheduler::RunReceipt>)> {
    let row = state
        .store
        .query_one("SELECT job_name FROM scheduled_jobs WHERE id = ?1", &[&id])?
        .ok_or(CortexError::NotFound(format!("job {id}")))?;
    let job_name = row
        .str_opt("job_name")
        .ok_or(CortexError::Internal("job row without name".into()))?;

    let receipt = state.scheduler.run_now(job_name)?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}
