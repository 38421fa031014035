//! Human-in-the-loop: a DB-backed queue of questions an automation asks its
//! human. Requests are answered over the API or Telegram; `wait` polls
//! cooperatively without ever holding a transaction across polls.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use cortex_store::{now_rfc3339, Row, RowExt, Store};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Approval,
    Choice,
    Input,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Approval => "approval",
            RequestType::Choice => "choice",
            RequestType::Input => "input",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Answered,
    Timeout,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Answered => "answered",
            RequestStatus::Timeout => "timeout",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "answered" => Ok(RequestStatus::Answered),
            "timeout" => Ok(RequestStatus::Timeout),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HumanRequest {
    pub id: i64,
    pub automation: String,
    pub request_type: String,
    pub question: String,
    pub options: Option<Value>,
    pub status: RequestStatus,
    pub response: Option<String>,
    pub context: Option<Value>,
    pub created_at: String,
    pub answered_at: Option<String>,
}

impl HumanRequest {
    fn from_row(row: Row) -> Option<Self> {
        Some(Self {
            id: row.i64_opt("id")?,
            automation: row.str_or("automation", ""),
            request_type: row.str_or("request_type", ""),
            question: row.str_or("question", ""),
            options: row.json_opt("options"),
            status: row.str_or("status", "pending").parse().ok()?,
            response: row.str_opt("response").map(str::to_string),
            context: row.json_opt("context"),
            created_at: row.str_or("created_at", ""),
            answered_at: row.str_opt("answered_at").map(str::to_string),
        })
    }
}

pub struct HumanInLoop {
    store: Store,
    automation: String,
}

impl HumanInLoop {
    pub fn new(store: Store, automation: &str) -> Self {
        Self {
            store,
            automation: automation.to_string(),
        }
    }

    pub fn create_request(
        &self,
        request_type: RequestType,
        question: &str,
        options: Option<&Value>,
        context: Option<&Value>,
    ) -> Result<i64> {
        let options_json = options.map(|v| v.to_string());
        let context_json = context.map(|v| v.to_string());
        let id = self.store.insert(
            "INSERT INTO human_requests
             (automation, request_type, question, options, context, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            &[
                &self.automation,
                &request_type.as_str(),
                &question,
                &options_json,
                &context_json,
                &now_rfc3339(),
            ],
        )?;
        info!(request_id = id, request_type = request_type.as_str(), "clarification requested");
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<HumanRequest> {
        self.store
            .query_one("SELECT * FROM human_requests WHERE id = ?1", &[&id])?
            .and_then(HumanRequest::from_row)
            .ok_or(PipelineError::RequestNotFound(id))
    }

    pub fn get_pending(&self) -> Result<Vec<HumanRequest>> {
        let rows = self.store.query(
            "SELECT * FROM human_requests
             WHERE automation = ?1 AND status = 'pending'
             ORDER BY created_at",
            &[&self.automation],
        )?;
        Ok(rows.into_iter().filter_map(HumanRequest::from_row).collect())
    }

    /// Answer a pending request. `approved` drives approval requests; plain
    /// answers become `answered`. Terminal requests stay terminal.
    pub fn respond(&self, id: i64, response: &str, approved: Option<bool>) -> Result<HumanRequest> {
        let status = match approved {
            Some(true) => RequestStatus::Approved,
            Some(false) => RequestStatus::Rejected,
            None => RequestStatus::Answered,
        };
        self.transition(id, status, Some(response))
    }

    pub fn cancel(&self, id: i64) -> Result<HumanRequest> {
        self.transition(id, RequestStatus::Cancelled, None)
    }

    fn transition(
        &self,
        id: i64,
        status: RequestStatus,
        response: Option<&str>,
    ) -> Result<HumanRequest> {
        let updated = self.store.exec(
            "UPDATE human_requests
             SET status = ?1, response = COALESCE(?2, response), answered_at = ?3
             WHERE id = ?4 AND status = 'pending'",
            &[&status.as_str(), &response, &now_rfc3339(), &id],
        )?;
        if updated == 0 {
            // Distinguish missing from terminal for the API layer.
            return match self.store.query_one(
                "SELECT id FROM human_requests WHERE id = ?1",
                &[&id],
            )? {
                Some(_) => Err(PipelineError::RequestNotPending(id)),
                None => Err(PipelineError::RequestNotFound(id)),
            };
        }
        self.get(id)
    }

    /// Block until the request leaves `pending`, polling every
    /// `poll_interval`. Marks the request `timeout` when the deadline
    /// passes and returns it in that state.
    pub async fn wait(
        &self,
        id: i64,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<HumanRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let request = self.get(id)?;
            if request.status != RequestStatus::Pending {
                return Ok(request);
            }
            if tokio::time::Instant::now() >= deadline {
                return self.transition(id, RequestStatus::Timeout, None);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hitl() -> HumanInLoop {
        HumanInLoop::new(Store::open_in_memory().unwrap(), "second_brain")
    }

    #[test]
    fn create_and_respond_to_choice() {
        let h = hitl();
        let id = h
            .create_request(
                RequestType::Choice,
                "Welches Projekt?",
                Some(&json!(["Alpha (projects)", "Beta (projects)"])),
                Some(&json!({"text": "Alpha fertig"})),
            )
            .unwrap();

        let pending = h.get_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, RequestStatus::Pending);

        let answered = h.respond(id, "Alpha (projects)", None).unwrap();
        assert_eq!(answered.status, RequestStatus::Answered);
        assert_eq!(answered.response.as_deref(), Some("Alpha (projects)"));
        assert!(answered.answered_at.is_some());
    }

    #[test]
    fn terminal_requests_are_immutable() {
        let h = hitl();
        let id = h
            .create_request(RequestType::Approval, "Löschen?", None, None)
            .unwrap();
        h.respond(id, "approve", Some(true)).unwrap();

        let err = h.respond(id, "reject", Some(false)).unwrap_err();
        assert!(matches!(err, PipelineError::RequestNotPending(_)));

        let request = h.get(id).unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
    }

    #[test]
    fn cancel_only_works_while_pending() {
        let h = hitl();
        let id = h
            .create_request(RequestType::Input, "Name?", None, None)
            .unwrap();
        assert_eq!(h.cancel(id).unwrap().status, RequestStatus::Cancelled);
        assert!(h.cancel(id).is_err());
    }

    #[test]
    fn missing_request_is_not_found() {
        let h = hitl();
        assert!(matches!(
            h.respond(999, "x", None).unwrap_err(),
            PipelineError::RequestNotFound(999)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_and_marks_the_request() {
        let h = hitl();
        let id = h
            .create_request(RequestType::Input, "Name?", None, None)
            .unwrap();

        let result = h
            .wait(id, Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.status, RequestStatus::Timeout);
    }

    #[tokio::test]
    async fn wait_returns_once_answered() {
        let h = hitl();
        let id = h
            .create_request(RequestType::Approval, "Ok?", None, None)
            .unwrap();
        h.respond(id, "yes", Some(true)).unwrap();

        let result = h
            .wait(id, Duration::from_secs(5), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(result.status, RequestStatus::Approved);
    }
}
