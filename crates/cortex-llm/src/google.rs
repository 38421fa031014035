use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::LlmClient;
use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, ChatResponse, Role};

#[derive(Debug)]
pub struct GoogleClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for GoogleClient {
    fn name(&self) -> &str {
        "google"
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, req.model, self.api_key
        );

        // Gemini history uses "user"/"model" roles; the system prompt rides
        // in system_instruction on the request itself.
        let contents: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                serde_json::json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": req.max_tokens,
            },
        });
        if let Some(ref system) = req.system {
            body["system_instruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        if let Some(t) = req.temperature {
            body["generationConfig"]["temperature"] = serde_json::json!(t);
        }
        if let Some(p) = req.top_p {
            body["generationConfig"]["topP"] = serde_json::json!(p);
        }
        if let Some(k) = req.top_k {
            body["generationConfig"]["topK"] = serde_json::json!(k);
        }
        if !req.stop_sequences.is_empty() {
            body["generationConfig"]["stopSequences"] = serde_json::json!(req.stop_sequences);
        }

        debug!(model = %req.model, "sending request to Google");

        let resp = self.client.post(&url).json(&body).send().await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(LlmError::RateLimited {
                retry_after_ms: 5000,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Google API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let candidate = api_resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Parse("empty candidates".into()))?;
        let content = candidate
            .content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        let usage = api_resp.usage_metadata.unwrap_or_default();

        Ok(ChatResponse {
            content,
            model: req.model.clone(),
            provider: "google".to_string(),
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            stop_reason: candidate.finish_reason.unwrap_or_default(),
            thinking: None,
        })
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}
