//! The intent pipeline.
//!
//! Coordinates prefix dispatch, fuzzy matching, intent classification,
//! structuring, persistence and clarification. Every executed intent leaves
//! an inbox_log row; every response goes back to the channel it came from.

use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use cortex_core::config::PipelineConfig;
use cortex_core::ChannelContext;
use cortex_agents::{Intent, IntentAgent, Preprocessor, StructureAgent};
use cortex_store::entities;
use cortex_store::{now_rfc3339, ConfigManager, EntityTable, Store};

use crate::edit::EditHandler;
use crate::error::{PipelineError, Result};
use crate::hitl::{HumanInLoop, RequestType};
use crate::matcher::EntityMatcher;
use crate::notify::Notifier;
use crate::prefix::{parse_prefix, PrefixKind};
use crate::query::QueryHandler;

pub struct IntentPipeline {
    store: Store,
    settings: Arc<ConfigManager>,
    defaults: PipelineConfig,
    intent_agent: IntentAgent,
    structure_agent: StructureAgent,
    edit: EditHandler,
    query: QueryHandler,
    hitl: HumanInLoop,
    notifier: Arc<dyn Notifier>,
}

impl IntentPipeline {
    pub fn new(
        store: Store,
        defaults: PipelineConfig,
        settings: Arc<ConfigManager>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        Ok(Self {
            intent_agent: IntentAgent::new(store.clone())?,
            structure_agent: StructureAgent::new(store.clone())?,
            edit: EditHandler::new(store.clone())?,
            query: QueryHandler::new(store.clone())?,
            hitl: HumanInLoop::new(store.clone(), "second_brain"),
            store,
            settings,
            defaults,
            notifier,
        })
    }

    pub fn hitl(&self) -> &HumanInLoop {
        &self.hitl
    }

    fn timezone(&self) -> Tz {
        self.settings
            .timezone()
            .parse()
            .unwrap_or(chrono_tz::Europe::Berlin)
    }

    fn preprocessor(&self) -> Preprocessor {
        Preprocessor::for_timezone(self.timezone())
    }

    fn today(&self) -> NaiveDate {
        self.preprocessor().reference_date()
    }

    fn confidence_threshold(&self) -> f64 {
        self.settings
            .confidence_threshold(self.defaults.confidence_threshold)
    }

    /// Main entry: route one piece of user text.
    pub async fn process(
        &self,
        input: &str,
        ctx: &ChannelContext,
        confirmed: bool,
        pending_action: Option<Value>,
    ) -> Result<Value> {
        let parsed = parse_prefix(input);
        info!(channel = %ctx.channel, kind = ?parsed.kind, "inbox input");

        match parsed.kind {
            PrefixKind::Query => {
                let outcome = self.query.handle(&parsed.text, &self.today().to_string()).await?;
                let message = outcome.answer.clone();
                let mut value = serde_json::to_value(&outcome)?;
                value["intent"] = json!("query");
                value["message"] = json!(message);
                Ok(value)
            }
            PrefixKind::Edit => {
                let outcome = self
                    .edit
                    .handle(&parsed.text, &self.today().to_string(), confirmed, pending_action)
                    .await?;
                let mut value = serde_json::to_value(&outcome)?;
                value["intent"] = json!("edit");
                if let Some(message) = value.get("message").and_then(Value::as_str) {
                    if !message.is_empty() {
                        self.notifier.notify(ctx, message).await;
                    }
                }
                Ok(value)
            }
            PrefixKind::Create => self.process_capture(&parsed.text, ctx).await,
        }
    }

    async fn process_capture(&self, text: &str, ctx: &ChannelContext) -> Result<Value> {
        if text.is_empty() {
            return Ok(json!({
                "success": false,
                "error": "empty input",
                "stage": "input",
            }));
        }

        let matcher = EntityMatcher::new(
            self.store.clone(),
            self.settings.stopwords("de"),
            self.defaults.keyword_min_length,
            self.defaults.max_matches,
        );
        let keywords = matcher.extract_keywords(text);
        let matches = matcher.search(&keywords)?;
        let match_values: Vec<Value> = matches.iter().map(|m| m.to_value()).collect();

        let intent_result = match self.intent_agent.analyze(text, &match_values).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "intent recognition failed");
                return Ok(json!({
                    "success": false,
                    "error": e.to_json(),
                    "stage": "intent_recognition",
                }));
            }
        };

        let confidence = intent_result
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let intent = intent_result
            .get("intent")
            .and_then(Value::as_str)
            .and_then(|s| Intent::from_str(s).ok())
            .unwrap_or(Intent::Unclear);

        info!(intent = %intent, confidence, "intent classified");

        if confidence < self.confidence_threshold() || intent == Intent::Unclear {
            return self.handle_unclear(text, &intent_result, ctx).await;
        }

        self.execute_intent(text, intent, &intent_result, ctx).await
    }

    /// Below-threshold or unclear input: park a clarification request and
    /// ask on the originating channel.
    async fn handle_unclear(
        &self,
        text: &str,
        intent_result: &serde_json::Map<String, Value>,
        ctx: &ChannelContext,
    ) -> Result<Value> {
        let question = intent_result
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or("Was meinst du?")
            .to_string();
        let options = intent_result
            .get("options")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let choice_labels: Vec<String> = options.iter().map(format_option).collect();

        let context = json!({
            "text": text,
            "channel": ctx,
            "intent_result": intent_result,
        });

        let request_id = if choice_labels.is_empty() {
            self.hitl
                .create_request(RequestType::Input, &question, None, Some(&context))?
        } else {
            self.hitl.create_request(
                RequestType::Choice,
                &question,
                Some(&json!(choice_labels)),
                Some(&context),
            )?
        };

        let mut message = format!("❓ {question}");
        if !choice_labels.is_empty() {
            message.push_str("\n\n");
            for label in &choice_labels {
                message.push_str(&format!("- {label}\n"));
            }
        }
        self.notifier.notify(ctx, message.trim_end()).await;

        Ok(json!({
            "success": false,
            "needs_clarification": true,
            "question": question,
            "options": choice_labels,
            "request_id": request_id,
        }))
    }

    /// Execute a classified intent. Shared by the direct path and the
    /// clarification resume path.
    async fn execute_intent(
        &self,
        text: &str,
        intent: Intent,
        intent_result: &serde_json::Map<String, Value>,
        ctx: &ChannelContext,
    ) -> Result<Value> {
        match intent {
            Intent::Complete | Intent::Delete => {
                self.execute_simple(text, intent, intent_result, ctx).await
            }
            Intent::Create | Intent::Update => {
                self.execute_with_structure(text, intent, intent_result, ctx).await
            }
            Intent::Unclear => self.handle_unclear(text, intent_result, ctx).await,
        }
    }

    async fn execute_simple(
        &self,
        text: &str,
        intent: Intent,
        intent_result: &serde_json::Map<String, Value>,
        ctx: &ChannelContext,
    ) -> Result<Value> {
        let Some((table, id)) = target_of(intent_result) else {
            return Ok(json!({
                "success": false,
                "error": "no target for intent",
                "intent": intent.as_str(),
            }));
        };

        let affected = match intent {
            Intent::Complete => self.store.complete_entity(table, id)?,
            _ => self.store.soft_delete_entity(table, id)?,
        };
        if affected == 0 {
            return Ok(json!({
                "success": false,
                "error": format!("{table} #{id} not found"),
                "intent": intent.as_str(),
            }));
        }

        self.write_inbox_log(text, intent.as_str(), Some(table.as_str()), Some(id), None, intent_result);

        let action = match intent {
            Intent::Complete => "abgeschlossen",
            _ => "gelöscht",
        };
        let message = format!("✅ {} #{id} {action}", capitalize(table.as_str()));
        self.notifier.notify(ctx, &message).await;
        info!(intent = %intent, table = %table, id, "intent executed");

        Ok(json!({
            "success": true,
            "intent": intent.as_str(),
            "target": {"table": table.as_str(), "id": id},
            "message": message,
        }))
    }

    async fn execute_with_structure(
        &self,
        text: &str,
        intent: Intent,
        intent_result: &serde_json::Map<String, Value>,
        ctx: &ChannelContext,
    ) -> Result<Value> {
        let category = intent_result.get("category").and_then(Value::as_str);
        let target = intent_result.get("target").filter(|t| t.is_object());

        let preprocessed = self
            .preprocessor()
            .prompt_context(text, category.unwrap_or("tasks"));

        let structured = match self
            .structure_agent
            .structure(intent, category, target, preprocessed)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "structuring failed");
                return Ok(json!({
                    "success": false,
                    "error": e.to_json(),
                    "stage": "structuring",
                }));
            }
        };

        let outcome = match intent {
            Intent::Create => {
                let Some(table) = category.and_then(|c| EntityTable::from_str(c).ok()) else {
                    return Ok(json!({
                        "success": false,
                        "error": format!("unknown category: {category:?}"),
                        "stage": "execution",
                    }));
                };
                let Some(data) = structured.get("data").and_then(Value::as_object).cloned() else {
                    return Ok(json!({
                        "success": false,
                        "error": "structure agent returned no data",
                        "stage": "structuring",
                    }));
                };
                let linked = structured
                    .get("linked_entities")
                    .and_then(Value::as_object)
                    .cloned();

                let record_id = self.store.tx(|tx| {
                    let id = entities::insert_entity(tx, table, &data)?;
                    if let Some(ref linked) = linked {
                        link_entities(tx, table, id, linked);
                    }
                    Ok(id)
                })?;

                self.write_inbox_log(
                    text,
                    intent.as_str(),
                    Some(table.as_str()),
                    Some(record_id),
                    Some(&Value::Object(structured.clone())),
                    intent_result,
                );

                let message = format!("✅ Neuer Eintrag in {}: #{record_id}", table.as_str());
                (record_id, table, message)
            }
            _ => {
                let Some((table, id)) = target_of(intent_result) else {
                    return Ok(json!({
                        "success": false,
                        "error": "no target for update",
                        "intent": intent.as_str(),
                    }));
                };
                let changes = structured
                    .get("changes")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                if !changes.is_empty() {
                    self.store.update_entity(table, id, &changes)?;
                }

                self.write_inbox_log(
                    text,
                    intent.as_str(),
                    Some(table.as_str()),
                    Some(id),
                    Some(&Value::Object(structured.clone())),
                    intent_result,
                );

                let message = format!("✅ {} #{id} aktualisiert", capitalize(table.as_str()));
                (id, table, message)
            }
        };

        let (record_id, table, message) = outcome;
        self.notifier.notify(ctx, &message).await;
        info!(intent = %intent, table = %table, record_id, "intent executed");

        Ok(json!({
            "success": true,
            "intent": intent.as_str(),
            "record_id": record_id,
            "category": table.as_str(),
            "message": message,
        }))
    }

    /// Resume a parked clarification: mark it answered, rebuild the intent
    /// with full confidence and execute it.
    pub async fn respond_to_clarification(&self, request_id: i64, choice: &str) -> Result<Value> {
        let request = self.hitl.respond(request_id, choice, None)?;

        let context = request
            .context
            .ok_or_else(|| PipelineError::Invalid("clarification has no context".into()))?;
        let text = context
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let ctx: ChannelContext = context
            .get("channel")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(|| ChannelContext::web(None));

        let stored = context
            .get("intent_result")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let options = stored
            .get("options")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let selected = options.iter().find(|option| {
            format_option(option) == choice
                || option.get("label").and_then(Value::as_str) == Some(choice)
        });

        let mut rebuilt = stored.clone();
        rebuilt.insert("confidence".into(), json!(1.0));

        let mut intent = stored
            .get("intent")
            .and_then(Value::as_str)
            .and_then(|s| Intent::from_str(s).ok())
            .filter(|i| *i != Intent::Unclear);

        if let Some(option) = selected {
            if let Some(explicit) = option
                .get("intent")
                .and_then(Value::as_str)
                .and_then(|s| Intent::from_str(s).ok())
            {
                intent = Some(explicit);
            }
            if let Some(id) = option.get("id").and_then(Value::as_i64) {
                rebuilt.insert(
                    "target".into(),
                    json!({"table": option.get("table"), "id": id}),
                );
                intent = intent.or(Some(Intent::Update));
            } else if let Some(table) = option.get("table").and_then(Value::as_str) {
                rebuilt.insert("category".into(), json!(table));
                intent = intent.or(Some(Intent::Create));
            }
        }

        let intent = intent.unwrap_or(Intent::Create);
        rebuilt.insert("intent".into(), json!(intent.as_str()));

        info!(request_id, %intent, "clarification resolved");
        self.execute_intent(&text, intent, &rebuilt, &ctx).await
    }

    /// Audit trail. Failures are logged, never propagated.
    fn write_inbox_log(
        &self,
        text: &str,
        intent: &str,
        target_table: Option<&str>,
        target_id: Option<i64>,
        changes: Option<&Value>,
        intent_result: &serde_json::Map<String, Value>,
    ) {
        let confidence = intent_result
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let needs_review = confidence < self.confidence_threshold();
        let target_table = target_table
            .map(str::to_string)
            .or_else(|| {
                intent_result
                    .get("category")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let changes_json = changes.map(|c| c.to_string());

        let result = self.store.exec(
            "INSERT INTO inbox_log
             (captured_text, intent, target_table, target_id, changes, confidence, needs_review, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            &[
                &text,
                &intent,
                &target_table,
                &target_id,
                &changes_json,
                &confidence,
                &(needs_review as i64),
                &now_rfc3339(),
            ],
        );
        if let Err(e) = result {
            warn!(error = %e, "inbox_log write failed");
        }
    }
}

fn target_of(intent_result: &serde_json::Map<String, Value>) -> Option<(EntityTable, i64)> {
    let target = intent_result.get("target")?.as_object()?;
    let table = target
        .get("table")?
        .as_str()?
        .parse::<EntityTable>()
        .ok()?;
    let id = target.get("id")?.as_i64()?;
    Some((table, id))
}

/// Render one clarification option as "{label} ({table})".
fn format_option(option: &Value) -> String {
    let table = option.get("table").and_then(Value::as_str).unwrap_or("?");
    let label = option
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or(table);
    format!("{label} ({table})")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Resolve linked people and projects after an insert. People are matched
/// case-insensitively by name and created when missing; projects only by
/// partial name. Link failures abort nothing; the captured row stands.
fn link_entities(
    conn: &rusqlite::Connection,
    table: EntityTable,
    record_id: i64,
    linked: &serde_json::Map<String, Value>,
) {
    let person_name = linked.get("person_name").and_then(Value::as_str);
    let project_name = linked.get("project_name").and_then(Value::as_str);

    let linkable = matches!(table, EntityTable::Tasks | EntityTable::CalendarEvents);
    if !linkable {
        return;
    }

    if let Some(name) = person_name.filter(|n| !n.is_empty()) {
        let person_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM people WHERE LOWER(name) = LOWER(?1) AND deleted_at IS NULL",
                [name],
                |row| row.get(0),
            )
            .ok();
        let person_id = match person_id {
            Some(id) => Some(id),
            None => {
                let mut data = serde_json::Map::new();
                data.insert("name".into(), json!(name));
                match entities::insert_entity(conn, EntityTable::People, &data) {
                    Ok(id) => {
                        info!(person = name, id, "linked person created");
                        Some(id)
                    }
                    Err(e) => {
                        warn!(person = name, error = %e, "linked person insert failed");
                        None
                    }
                }
            }
        };
        if let Some(pid) = person_id {
            let sql = format!("UPDATE {} SET person_id = ?1 WHERE id = ?2", table.as_str());
            if let Err(e) = conn.execute(&sql, rusqlite::params![pid, record_id]) {
                warn!(error = %e, "person link failed");
            }
        }
    }

    if table == EntityTable::Tasks {
        if let Some(name) = project_name.filter(|n| !n.is_empty()) {
            let pattern = format!("%{}%", name.to_lowercase());
            let project_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM projects WHERE LOWER(name) LIKE ?1 AND deleted_at IS NULL",
                    [pattern],
                    |row| row.get(0),
                )
                .ok();
            if let Some(pid) = project_id {
                if let Err(e) = conn.execute(
                    "UPDATE tasks SET project_id = ?1 WHERE id = ?2",
                    rusqlite::params![pid, record_id],
                ) {
                    warn!(error = %e, "project link failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use cortex_store::RowExt;
    use serde_json::json;

    /// Seed the agent_configs and api_keys rows the pipeline loads at
    /// construction. No network call happens unless an agent executes.
    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        let now = now_rfc3339();
        for agent in [
            "intent_agent",
            "structure_agent",
            "query_classifier",
            "query_agent",
            "edit_agent",
        ] {
            store
                .exec(
                    "INSERT INTO agent_configs
                     (agent_name, provider, model, system_prompt, user_prompt_template,
                      is_active, created_at, updated_at)
                     VALUES (?1, 'anthropic', 'claude-sonnet-4-5', 'sys', '{text}', 1, ?2, ?2)",
                    &[&agent, &now],
                )
                .unwrap();
        }
        store
            .exec(
                "INSERT INTO api_keys (provider, api_key, valid, created_at, updated_at)
                 VALUES ('anthropic', 'sk-test', 1, ?1, ?1)",
                &[&now],
            )
            .unwrap();
        store
    }

    fn pipeline(store: Store) -> IntentPipeline {
        let settings = Arc::new(ConfigManager::new(store.clone()));
        IntentPipeline::new(
            store,
            PipelineConfig::default(),
            settings,
            Arc::new(NullNotifier),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn clarification_resume_completes_the_target() {
        let store = seeded_store();
        let project_id = store
            .insert_entity(
                EntityTable::Projects,
                &json!({"name": "Reibekuchenofen"}).as_object().unwrap().clone(),
            )
            .unwrap();
        let p = pipeline(store.clone());

        // Park a clarification the way process() would for unclear input.
        let context = json!({
            "text": "Reibekuchenofen ist fertig",
            "channel": {"channel": "web", "channel_id": null, "metadata": {}},
            "intent_result": {
                "intent": "complete",
                "options": [
                    {"table": "projects", "id": project_id, "label": "Reibekuchenofen"},
                ],
            },
        });
        let request_id = p
            .hitl()
            .create_request(
                RequestType::Choice,
                "Welches Projekt?",
                Some(&json!(["Reibekuchenofen (projects)"])),
                Some(&context),
            )
            .unwrap();

        let result = p
            .respond_to_clarification(request_id, "Reibekuchenofen (projects)")
            .await
            .unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["intent"], json!("complete"));

        let row = store
            .get_entity(EntityTable::Projects, project_id)
            .unwrap()
            .unwrap();
        assert_eq!(row.str_opt("status"), Some("done"));

        // The request is terminal and the mutation was audit-logged.
        let request = p.hitl().get(request_id).unwrap();
        assert_eq!(request.status, crate::hitl::RequestStatus::Answered);
        let logs = store.query("SELECT * FROM inbox_log", &[]).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].str_opt("intent"), Some("complete"));
        assert_eq!(logs[0].str_opt("target_table"), Some("projects"));
    }

    #[tokio::test]
    async fn clarification_cannot_be_answered_twice() {
        let store = seeded_store();
        let p = pipeline(store);
        let request_id = p
            .hitl()
            .create_request(
                RequestType::Choice,
                "Was?",
                Some(&json!(["A (tasks)"])),
                Some(&json!({"text": "x", "intent_result": {"options": []}})),
            )
            .unwrap();

        p.hitl().respond(request_id, "A (tasks)", None).unwrap();
        let err = p.respond_to_clarification(request_id, "A (tasks)").await.unwrap_err();
        assert!(matches!(err, PipelineError::RequestNotPending(_)));
    }

    #[tokio::test]
    async fn simple_delete_soft_deletes_and_logs() {
        let store = seeded_store();
        let task_id = store
            .insert_entity(
                EntityTable::Tasks,
                &json!({"title": "Altlast"}).as_object().unwrap().clone(),
            )
            .unwrap();
        let p = pipeline(store.clone());

        let intent_result = json!({
            "intent": "delete",
            "confidence": 0.9,
            "target": {"table": "tasks", "id": task_id},
        })
        .as_object()
        .unwrap()
        .clone();
        let ctx = ChannelContext::web(None);

        let result = p
            .execute_intent("Altlast löschen", Intent::Delete, &intent_result, &ctx)
            .await
            .unwrap();
        assert_eq!(result["success"], json!(true));
        assert!(store.get_entity(EntityTable::Tasks, task_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_target_is_a_structured_failure() {
        let store = seeded_store();
        let p = pipeline(store);
        let intent_result = json!({"intent": "complete", "confidence": 0.9})
            .as_object()
            .unwrap()
            .clone();
        let result = p
            .execute_intent("fertig", Intent::Complete, &intent_result, &ChannelContext::web(None))
            .await
            .unwrap();
        assert_eq!(result["success"], json!(false));
    }
}
