//! DB-configured agent: a prompt template, an output schema and a call
//! policy bound to one LLM client. Prompt changes land in the database and
//! take effect on `reload()` without a deployment.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use cortex_llm::{build_client, ChatRequest, LlmClient, Message};
use cortex_store::{now_rfc3339, RowExt, Store};

use crate::error::{AgentError, Result};
use crate::parser::parse_json;
use crate::schema::OutputSchema;

const BACKOFF_STEP: Duration = Duration::from_millis(500);
const RAW_RESPONSE_CAP: usize = 500;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub agent_name: String,
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt_template: Option<String>,
    pub output_schema: Option<OutputSchema>,
    pub retry_count: u32,
    pub timeout_seconds: u64,
    pub max_tokens: u32,
    pub temperature: f64,
    pub fallback_provider: Option<String>,
    pub fallback_model: Option<String>,
}

impl AgentSettings {
    pub fn load(store: &Store, agent_name: &str) -> Result<Self> {
        let row = store
            .query_one(
                "SELECT * FROM agent_configs WHERE agent_name = ?1 AND is_active = 1",
                &[&agent_name],
            )?
            .ok_or_else(|| AgentError::ConfigMissing(agent_name.to_string()))?;

        let output_schema = row
            .json_opt("output_schema")
            .as_ref()
            .and_then(OutputSchema::from_json);

        Ok(Self {
            agent_name: row.str_or("agent_name", ""),
            provider: row.str_or("provider", "anthropic"),
            model: row.str_or("model", ""),
            system_prompt: row.str_or("system_prompt", ""),
            user_prompt_template: row.str_opt("user_prompt_template").map(str::to_string),
            output_schema,
            retry_count: row.i64_opt("retry_count").unwrap_or(3) as u32,
            timeout_seconds: row.i64_opt("timeout_seconds").unwrap_or(30) as u64,
            max_tokens: row.i64_opt("max_tokens").unwrap_or(1024) as u32,
            temperature: row.f64_opt("temperature").unwrap_or(0.2),
            fallback_provider: row.str_opt("fallback_provider").map(str::to_string),
            fallback_model: row.str_opt("fallback_model").map(str::to_string),
        })
    }
}

struct Inner {
    settings: AgentSettings,
    /// Built on first use so a missing API key surfaces on execution, not
    /// at startup.
    client: Option<Arc<dyn LlmClient>>,
}

pub struct ConfigurableAgent {
    store: Store,
    name: String,
    inner: Mutex<Inner>,
}

impl ConfigurableAgent {
    pub fn new(store: Store, agent_name: &str) -> Result<Self> {
        let settings = AgentSettings::load(&store, agent_name)?;
        Ok(Self {
            store,
            name: agent_name.to_string(),
            inner: Mutex::new(Inner {
                settings,
                client: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-read the agent_configs row and drop the cached client (hot
    /// reload).
    pub fn reload(&self) -> Result<()> {
        let settings = AgentSettings::load(&self.store, &self.name)?;
        let mut inner = self.inner.lock().unwrap();
        inner.settings = settings;
        inner.client = None;
        Ok(())
    }

    fn client(&self, settings: &AgentSettings) -> Result<Arc<dyn LlmClient>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(ref client) = inner.client {
            return Ok(Arc::clone(client));
        }
        let client = build_client(&self.store, &settings.provider, None)?;
        inner.client = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Render the template, call the model with retry and fallback, parse
    /// the answer through the output schema.
    pub async fn execute(&self, context: &serde_json::Map<String, Value>) -> Result<serde_json::Map<String, Value>> {
        let settings = self.inner.lock().unwrap().settings.clone();
        let client = self.client(&settings)?;

        let template = settings
            .user_prompt_template
            .as_deref()
            .ok_or_else(|| AgentError::ConfigMissing(format!("{}: user_prompt_template", self.name)))?;
        let user_prompt = render_template(template, context);

        let request = ChatRequest {
            model: settings.model.clone(),
            system: Some(settings.system_prompt.clone()),
            messages: vec![Message::user(user_prompt)],
            max_tokens: settings.max_tokens,
            temperature: Some(settings.temperature),
            ..Default::default()
        };

        let mut response = None;
        let mut last_error = String::new();
        for attempt in 0..=settings.retry_count {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_STEP * attempt).await;
            }
            match tokio::time::timeout(
                Duration::from_secs(settings.timeout_seconds),
                client.chat(&request),
            )
            .await
            {
                Ok(Ok(resp)) => {
                    response = Some(resp);
                    break;
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    warn!(agent = %self.name, attempt, error = %last_error, "agent call failed");
                }
                Err(_) => {
                    last_error = format!("timeout after {}s", settings.timeout_seconds);
                    warn!(agent = %self.name, attempt, "agent call timed out");
                }
            }
        }

        // One shot on the fallback provider/model after retries are spent.
        if response.is_none() {
            if let (Some(provider), Some(model)) =
                (&settings.fallback_provider, &settings.fallback_model)
            {
                debug!(agent = %self.name, %provider, %model, "trying fallback model");
                match build_client(&self.store, provider, None) {
                    Ok(fallback) => {
                        let mut req = request.clone();
                        req.model = model.clone();
                        match tokio::time::timeout(
                            Duration::from_secs(settings.timeout_seconds),
                            fallback.chat(&req),
                        )
                        .await
                        {
                            Ok(Ok(resp)) => response = Some(resp),
                            Ok(Err(e)) => last_error = e.to_string(),
                            Err(_) => {
                                last_error = format!("timeout after {}s", settings.timeout_seconds)
                            }
                        }
                    }
                    Err(e) => last_error = e.to_string(),
                }
            }
        }

        self.track(response.is_some());

        let Some(response) = response else {
            return Err(AgentError::Llm {
                agent: self.name.clone(),
                message: last_error,
            });
        };

        let outcome = parse_json(&response.content, settings.output_schema.as_ref());
        if !outcome.success {
            return Err(AgentError::Parse {
                agent: self.name.clone(),
                raw_response: truncate(&response.content, RAW_RESPONSE_CAP),
                errors: outcome.errors,
            });
        }
        match outcome.data {
            Value::Object(map) => Ok(map),
            other => Err(AgentError::Parse {
                agent: self.name.clone(),
                raw_response: truncate(&other.to_string(), RAW_RESPONSE_CAP),
                errors: vec!["response is not a JSON object".to_string()],
            }),
        }
    }

    /// Call counters and last_used_at. Failures here never propagate.
    fn track(&self, success: bool) {
        let now = now_rfc3339();
        let sql = if success {
            "UPDATE agent_configs
             SET total_calls = total_calls + 1, last_used_at = ?1, updated_at = ?1
             WHERE agent_name = ?2"
        } else {
            "UPDATE agent_configs
             SET total_calls = total_calls + 1, error_count = error_count + 1,
                 last_used_at = ?1, updated_at = ?1
             WHERE agent_name = ?2"
        };
        if let Err(e) = self.store.exec(sql, &[&now, &self.name]) {
            warn!(agent = %self.name, error = %e, "agent tracking update failed");
        }
    }
}

/// Literal `{placeholder}` substitution. Complex values are serialised as
/// JSON, None as `null`; `{{`/`}}` come out as literal braces so prompts can
/// carry JSON examples.
pub fn render_template(template: &str, context: &serde_json::Map<String, Value>) -> String {
    let mut result = template.to_string();
    for (key, value) in context {
        let placeholder = format!("{{{key}}}");
        let replacement = match value {
            Value::Null => "null".to_string(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        result = result.replace(&placeholder, &replacement);
    }
    result.replace("{{", "{").replace("}}", "}")
}

fn truncate(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn template_substitutes_scalars_and_json() {
        let rendered = render_template(
            "Text: {text}\nMatches: {matches}\nTarget: {target}",
            &ctx(json!({
                "text": "Anruf bei Schmidt",
                "matches": [{"table": "people", "id": 3}],
                "target": null,
            })),
        );
        assert!(rendered.contains("Text: Anruf bei Schmidt"));
        assert!(rendered.contains(r#"Matches: [{"id":3,"table":"people"}]"#));
        assert!(rendered.contains("Target: null"));
    }

    #[test]
    fn escaped_braces_become_literals() {
        let rendered = render_template(
            "Antworte als JSON: {{\"intent\": \"create\", \"text\": \"{text}\"}}",
            &ctx(json!({"text": "hi"})),
        );
        assert_eq!(rendered, "Antworte als JSON: {\"intent\": \"create\", \"text\": \"hi\"}");
    }

    #[test]
    fn settings_load_requires_active_config() {
        let store = Store::open_in_memory().unwrap();
        let err = AgentSettings::load(&store, "intent_agent").unwrap_err();
        assert!(matches!(err, AgentError::ConfigMissing(_)));

        store
            .exec(
                "INSERT INTO agent_configs
                 (agent_name, provider, model, system_prompt, user_prompt_template,
                  output_schema, is_active, created_at, updated_at)
                 VALUES ('intent_agent', 'anthropic', 'claude-sonnet-4-5', 'sys', 'u: {text}',
                         '{\"intent\": {\"type\": \"string\", \"required\": true}}', 1, ?1, ?1)",
                &[&now_rfc3339()],
            )
            .unwrap();

        let settings = AgentSettings::load(&store, "intent_agent").unwrap();
        assert_eq!(settings.provider, "anthropic");
        assert!(settings.output_schema.is_some());
        assert_eq!(settings.retry_count, 3);
    }
}
