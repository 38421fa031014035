//! Telegram slash-command handling.
//!
//! `/verb args…` is executed directly; anything else is free text for the
//! intent pipeline. Heavy verbs delegate to the pipeline or the report
//! agents; trivial reads hit the store directly.

use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use cortex_agents::DailyReportAgent;
use cortex_core::ChannelContext;
use cortex_pipeline::IntentPipeline;
use cortex_store::{RowExt, Store};

const COMMANDS: &[(&str, &str)] = &[
    ("help", "Zeigt alle verfügbaren Befehle"),
    ("status", "Zeigt System-Status (offene Tasks, etc.)"),
    ("query", "Fragt das Second Brain (z.B. /query Projekt Alpha)"),
    ("tasks", "Zeigt deine offenen Aufgaben"),
    ("today", "Zeigt heutige Termine und Tasks"),
    ("daily", "Fordert den Daily Report an"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage {
    Command { verb: String, args: Vec<String> },
    FreeText(String),
}

pub fn parse_message(text: &str) -> ParsedMessage {
    let text = text.trim();
    if !text.starts_with('/') {
        return ParsedMessage::FreeText(text.to_string());
    }

    let mut parts = text[1..].split_whitespace();
    let verb = parts.next().unwrap_or_default().to_lowercase();
    let args = parts.map(str::to_string).collect();
    ParsedMessage::Command { verb, args }
}

pub struct TelegramCommandHandler {
    store: Store,
    pipeline: Arc<IntentPipeline>,
    tz: Tz,
}

impl TelegramCommandHandler {
    pub fn new(store: Store, pipeline: Arc<IntentPipeline>, tz: Tz) -> Self {
        Self {
            store,
            pipeline,
            tz,
        }
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Execute one slash command. Free text belongs to the caller (it goes
    /// into the pipeline with the full channel context).
    pub async fn execute(&self, verb: &str, args: &[String], ctx: &ChannelContext) -> String {
        match verb {
            "help" => self.cmd_help(),
            "status" => self.cmd_status(),
            "tasks" => self.cmd_tasks(),
            "today" => self.cmd_today(),
            "daily" => self.cmd_daily().await,
            "query" => self.cmd_query(args, ctx).await,
            other => format!("Befehl /{other} ist unbekannt. Nutze /help für eine Liste."),
        }
    }

    fn cmd_help(&self) -> String {
        let mut lines = vec!["<b>Verfügbare Befehle:</b>".to_string(), String::new()];
        for (verb, description) in COMMANDS {
            lines.push(format!("/{verb} - {description}"));
        }
        lines.join("\n")
    }

    fn cmd_status(&self) -> String {
        let open = self.count(
            "SELECT COUNT(*) AS n FROM tasks
             WHERE status IN ('next', 'waiting') AND deleted_at IS NULL",
            &[],
        );
        let today = self.today().to_string();
        let overdue = self.count(
            "SELECT COUNT(*) AS n FROM tasks
             WHERE due_date IS NOT NULL AND due_date < ?1
               AND status NOT IN ('done', 'someday') AND deleted_at IS NULL",
            &[&today],
        );
        let events = self.count(
            "SELECT COUNT(*) AS n FROM calendar_events WHERE date(start_time) = ?1",
            &[&today],
        );

        format!(
            "<b>Status:</b>\nOffene Aufgaben: {open}\nÜberfällig: {overdue}\nHeutige Termine: {events}"
        )
    }

    fn cmd_tasks(&self) -> String {
        let rows = match self.store.query(
            "SELECT title, due_date FROM tasks
             WHERE status IN ('next', 'waiting') AND deleted_at IS NULL
             ORDER BY priority ASC, due_date IS NULL, due_date ASC
             LIMIT 10",
            &[],
        ) {
            Ok(rows) => rows,
            Err(e) => return format!("Fehler: {e}"),
        };

        if rows.is_empty() {
            return "Keine offenen Aufgaben.".to_string();
        }

        let mut lines = vec!["<b>Offene Aufgaben:</b>".to_string(), String::new()];
        for row in rows {
            let title = row.str_or("title", "Unbenannt");
            match row.str_opt("due_date") {
                Some(due) => lines.push(format!("- {title} (bis {due})")),
                None => lines.push(format!("- {title}")),
            }
        }
        lines.join("\n")
    }

    fn cmd_today(&self) -> String {
        let today = self.today();
        let today_str = today.to_string();

        let events = self
            .store
            .query(
                "SELECT title, start_time FROM calendar_events
                 WHERE date(start_time) = ?1 ORDER BY start_time",
                &[&today_str],
            )
            .unwrap_or_default();
        let tasks = self
            .store
            .query(
                "SELECT title FROM tasks
                 WHERE due_date = ?1 AND status NOT IN ('done', 'someday')
                   AND deleted_at IS NULL",
                &[&today_str],
            )
            .unwrap_or_default();

        let mut lines = vec![
            format!("<b>Heute ({}):</b>", today.format("%d.%m.%Y")),
            String::new(),
        ];

        if !events.is_empty() {
            lines.push("<b>Termine:</b>".to_string());
            for event in &events {
                let title = event.str_or("title", "Unbenannt");
                let time = event
                    .str_opt("start_time")
                    .and_then(|s| s.split('T').nth(1))
                    .map(|t| t.chars().take(5).collect::<String>())
                    .unwrap_or_default();
                lines.push(format!("- {time} {title}"));
            }
            lines.push(String::new());
        }

        if !tasks.is_empty() {
            lines.push("<b>Fällige Aufgaben:</b>".to_string());
            for task in &tasks {
                lines.push(format!("- {}", task.str_or("title", "Unbenannt")));
            }
        }

        if events.is_empty() && tasks.is_empty() {
            lines.push("Nichts geplant für heute.".to_string());
        }

        lines.join("\n")
    }

    async fn cmd_daily(&self) -> String {
        let agent = match DailyReportAgent::new(self.store.clone()) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(error = %e, "daily report agent unavailable");
                return "Daily Report ist nicht konfiguriert.".to_string();
            }
        };
        match agent.generate_from_db(self.today()).await {
            Ok(report) => {
                let summary = report
                    .get("summary_text")
                    .and_then(Value::as_str)
                    .unwrap_or("Report erstellt.");
                format!("📋 Daily Report\n\n{summary}")
            }
            Err(e) => {
                warn!(error = %e, "daily report failed");
                "Daily Report konnte nicht erstellt werden.".to_string()
            }
        }
    }

    /// Route /query through the full query pipeline.
    async fn cmd_query(&self, args: &[String], ctx: &ChannelContext) -> String {
        if args.is_empty() {
            return "Bitte gib eine Frage an. Beispiel: /query Projekt Alpha".to_string();
        }
        let question = format!("? {}", args.join(" "));
        match self.pipeline.process(&question, ctx, false, None).await {
            Ok(result) => result
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Keine Antwort.")
                .to_string(),
            Err(e) => {
                warn!(error = %e, "query command failed");
                "Fehler bei der Abfrage.".to_string()
            }
        }
    }

    fn count(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> i64 {
        self.store
            .query_one(sql, params)
            .ok()
            .flatten()
            .and_then(|row| row.i64_opt("n"))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_commands_parse_into_verb_and_args() {
        assert_eq!(
            parse_message("/query Projekt Alpha"),
            ParsedMessage::Command {
                verb: "query".into(),
                args: vec!["Projekt".into(), "Alpha".into()],
            }
        );
        assert_eq!(
            parse_message("/HELP"),
            ParsedMessage::Command {
                verb: "help".into(),
                args: vec![],
            }
        );
    }

    #[test]
    fn non_slash_text_is_free_text() {
        assert_eq!(
            parse_message("Milch kaufen morgen"),
            ParsedMessage::FreeText("Milch kaufen morgen".into())
        );
        // A slash later in the text does not make it a command.
        assert_eq!(
            parse_message("a/b testen"),
            ParsedMessage::FreeText("a/b testen".into())
        );
    }
}
