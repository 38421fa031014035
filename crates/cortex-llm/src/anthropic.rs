use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::LlmClient;
use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, ChatResponse};

const API_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "messages": messages,
    });

    if let Some(ref system) = req.system {
        body["system"] = serde_json::json!(system);
    }
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    if let Some(p) = req.top_p {
        body["top_p"] = serde_json::json!(p);
    }
    if let Some(k) = req.top_k {
        body["top_k"] = serde_json::json!(k);
    }
    if !req.stop_sequences.is_empty() {
        body["stop_sequences"] = serde_json::json!(req.stop_sequences);
    }

    // The extended-thinking API rejects any temperature other than 1.0.
    if let Some(budget) = req.thinking_budget {
        body["thinking"] = serde_json::json!({
            "type": "enabled",
            "budget_tokens": budget,
        });
        body["temperature"] = serde_json::json!(1.0);
    }

    body
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut thinking: Option<String> = None;

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::Thinking { thinking: t } => thinking = Some(t),
            ContentBlock::Unknown => {}
        }
    }

    ChatResponse {
        content: text_parts.join(""),
        model: resp.model,
        provider: "anthropic".to_string(),
        input_tokens: resp.usage.input_tokens,
        output_tokens: resp.usage.output_tokens,
        stop_reason: resp.stop_reason.unwrap_or_default(),
        thinking,
    }
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// Internal reasoning block — surfaced via `ChatResponse.thinking`,
    /// never mixed into `content`.
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_budget_forces_temperature_to_one() {
        let req = ChatRequest {
            model: "claude-sonnet-4-5".into(),
            max_tokens: 512,
            temperature: Some(0.2),
            thinking_budget: Some(2048),
            ..Default::default()
        };
        let body = build_request_body(&req);
        assert_eq!(body["temperature"], serde_json::json!(1.0));
        assert_eq!(body["thinking"]["budget_tokens"], serde_json::json!(2048));
    }

    #[test]
    fn system_prompt_goes_into_system_field() {
        let req = ChatRequest {
            model: "claude-sonnet-4-5".into(),
            max_tokens: 64,
            system: Some("Du bist knapp.".into()),
            messages: vec![crate::types::Message::user("Hi")],
            ..Default::default()
        };
        let body = build_request_body(&req);
        assert_eq!(body["system"], serde_json::json!("Du bist knapp."));
        assert_eq!(body["messages"][0]["role"], serde_json::json!("user"));
    }
}
