//! Telegram webhook ingress.
//!
//! The webhook body maps to `{message.text, message.chat.id}`. Slash
//! commands are answered directly; anything else runs through the intent
//! pipeline. Replies go back to the originating chat only.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};

use cortex_channels::{parse_message, ParsedMessage};
use cortex_core::ChannelContext;

use crate::app::AppState;
use crate::http::error::ApiResult;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    // When a webhook secret is configured, reject everything without it.
    if let Some(settings) = state.notifier.telegram_settings() {
        if let Some(expected) = settings.webhook_secret.as_deref() {
            let presented = headers
                .get(SECRET_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if presented != expected {
                warn!("telegram webhook rejected: bad secret token");
                return Ok((StatusCode::UNAUTHORIZED, Json(json!({"ok": false}))));
            }
        }
    }

    let Some(text) = update
        .pointer("/message/text")
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        // Non-text updates (stickers, joins, …) are acknowledged and dropped.
        return Ok((StatusCode::OK, Json(json!({"ok": true}))));
    };
    let Some(chat_id) = update
        .pointer("/message/chat/id")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
    else {
        return Ok((StatusCode::OK, Json(json!({"ok": true}))));
    };

    info!(chat_id = %chat_id, "telegram message received");
    let ctx = ChannelContext::telegram(chat_id.clone());

    let response_text = match parse_message(&text) {
        ParsedMessage::Command { verb, args } => {
            Some(state.commands.execute(&verb, &args, &ctx).await)
        }
        ParsedMessage::FreeText(text) => {
            // The pipeline notifies the chat itself on success; relay the
            // message here only for results that carry one and failed runs.
            match state.pipeline.process(&text, &ctx, false, None).await {
                Ok(result) => {
                    let handled_by_notifier = result
                        .get("success")
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
                        || result
                            .get("needs_clarification")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                    if handled_by_notifier {
                        None
                    } else {
                        result
                            .get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .or(Some("Das hat leider nicht geklappt.".to_string()))
                    }
                }
                Err(e) => {
                    warn!(error = %e, "pipeline failed for telegram input");
                    Some("Das hat leider nicht geklappt.".to_string())
                }
            }
        }
    };

    if let Some(text) = response_text {
        let _ = state.notifier.send_telegram(&text, Some(&chat_id)).await;
    }

    Ok((StatusCode::OK, Json(json!({"ok": true}))))
}
