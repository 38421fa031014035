//! Report fan-out to the recipients configured in report_channels.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use cortex_store::{now_rfc3339, Result, RowExt, Store};

use crate::notify::NotificationService;

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub channel: String,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ReportDispatcher {
    store: Store,
    notifier: NotificationService,
}

impl ReportDispatcher {
    pub fn new(store: Store) -> Self {
        let notifier = NotificationService::new(store.clone(), "report_dispatcher");
        Self { store, notifier }
    }

    /// Recipients per channel type for one report type.
    pub fn recipients(&self, report_type: &str) -> Result<Vec<(String, Vec<String>)>> {
        let rows = self.store.query(
            "SELECT channel_type, recipients FROM report_channels
             WHERE report_type = ?1 AND is_active = 1",
            &[&report_type],
        )?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let channel = row.str_opt("channel_type")?.to_string();
                let recipients = row
                    .json_opt("recipients")
                    .and_then(|v| v.as_array().cloned())
                    .map(|items| {
                        items
                            .into_iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                Some((channel, recipients))
            })
            .collect())
    }

    pub fn add_recipient(
        &self,
        report_type: &str,
        channel_type: &str,
        recipient: &str,
    ) -> Result<()> {
        let existing = self.store.query_one(
            "SELECT id, recipients FROM report_channels
             WHERE report_type = ?1 AND channel_type = ?2",
            &[&report_type, &channel_type],
        )?;

        match existing {
            Some(row) => {
                let id = row.i64_opt("id").unwrap_or_default();
                let mut recipients: Vec<String> = row
                    .json_opt("recipients")
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                if !recipients.iter().any(|r| r == recipient) {
                    recipients.push(recipient.to_string());
                }
                self.store.exec(
                    "UPDATE report_channels SET recipients = ?1, updated_at = ?2 WHERE id = ?3",
                    &[&json!(recipients).to_string(), &now_rfc3339(), &id],
                )?;
            }
            None => {
                self.store.exec(
                    "INSERT INTO report_channels
                     (report_type, channel_type, recipients, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    &[
                        &report_type,
                        &channel_type,
                        &json!([recipient]).to_string(),
                        &now_rfc3339(),
                    ],
                )?;
            }
        }
        Ok(())
    }

    pub fn remove_recipient(
        &self,
        report_type: &str,
        channel_type: &str,
        recipient: &str,
    ) -> Result<bool> {
        let Some(row) = self.store.query_one(
            "SELECT id, recipients FROM report_channels
             WHERE report_type = ?1 AND channel_type = ?2",
            &[&report_type, &channel_type],
        )?
        else {
            return Ok(false);
        };

        let id = row.i64_opt("id").unwrap_or_default();
        let mut recipients: Vec<String> = row
            .json_opt("recipients")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        recipients.retain(|r| r != recipient);
        self.store.exec(
            "UPDATE report_channels SET recipients = ?1, updated_at = ?2 WHERE id = ?3",
            &[&json!(recipients).to_string(), &now_rfc3339(), &id],
        )?;
        Ok(true)
    }

    /// Channel-specific rendering: Telegram gets HTML-flavoured text, web
    /// keeps the structured report.
    pub fn format_for_channel(report: &Value, channel_type: &str) -> Value {
        match channel_type {
            "telegram" => {
                let title = report
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("Report");
                let summary = report
                    .get("summary_text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Value::String(format!("<b>{title}</b>\n\n{summary}"))
            }
            _ => report.clone(),
        }
    }

    /// Deliver one report to every configured recipient. Telegram messages
    /// go out here; web recipients receive the structured payload through
    /// the gateway's notification queue.
    pub async fn dispatch(&self, report_type: &str, report: &Value) -> Result<Vec<DispatchResult>> {
        let mut results = Vec::new();

        for (channel, recipients) in self.recipients(report_type)? {
            for recipient in recipients {
                match channel.as_str() {
                    "telegram" => {
                        let text = match Self::format_for_channel(report, "telegram") {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        let sent = self.notifier.send_telegram(&text, Some(&recipient)).await;
                        results.push(DispatchResult {
                            success: sent.success,
                            channel: channel.clone(),
                            recipient,
                            error: sent.error,
                        });
                    }
                    _ => {
                        results.push(DispatchResult {
                            success: true,
                            channel: channel.clone(),
                            recipient,
                            error: None,
                        });
                    }
                }
            }
        }

        info!(report_type, count = results.len(), "report dispatched");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_round_trip() {
        let dispatcher = ReportDispatcher::new(Store::open_in_memory().unwrap());

        dispatcher
            .add_recipient("daily_report", "telegram", "42")
            .unwrap();
        dispatcher
            .add_recipient("daily_report", "telegram", "43")
            .unwrap();
        // Duplicates collapse.
        dispatcher
            .add_recipient("daily_report", "telegram", "42")
            .unwrap();

        let recipients = dispatcher.recipients("daily_report").unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].0, "telegram");
        assert_eq!(recipients[0].1, vec!["42", "43"]);

        dispatcher
            .remove_recipient("daily_report", "telegram", "42")
            .unwrap();
        let recipients = dispatcher.recipients("daily_report").unwrap();
        assert_eq!(recipients[0].1, vec!["43"]);
    }

    #[test]
    fn telegram_formatting_is_html_text() {
        let report = json!({
            "title": "Daily Report",
            "summary_text": "3 Aufgaben offen.",
            "top_3_tasks": [],
        });
        let formatted = ReportDispatcher::format_for_channel(&report, "telegram");
        assert_eq!(
            formatted,
            Value::String("<b>Daily Report</b>\n\n3 Aufgaben offen.".to_string())
        );

        let web = ReportDispatcher::format_for_channel(&report, "web");
        assert_eq!(web["summary_text"], "3 Aufgaben offen.");
    }
}
