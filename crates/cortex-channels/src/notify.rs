//! Notification delivery: Telegram Bot API and generic webhooks.
//!
//! Failures come back as a `NotificationResult`: reported, logged,
//! and never raised into caller paths.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use cortex_store::{RowExt, Store};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct NotificationResult {
    pub automation: String,
    pub success: bool,
    pub channel: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: Option<String>,
    pub webhook_secret: Option<String>,
}

pub struct NotificationService {
    store: Store,
    automation: String,
    client: reqwest::Client,
    telegram_base: String,
    /// Invalidatable telegram_config cache (read-mostly).
    telegram_cache: Mutex<Option<Option<TelegramSettings>>>,
}

impl NotificationService {
    pub fn new(store: Store, automation: &str) -> Self {
        Self {
            store,
            automation: automation.to_string(),
            client: reqwest::Client::new(),
            telegram_base: "https://api.telegram.org".to_string(),
            telegram_cache: Mutex::new(None),
        }
    }

    /// Point the service at a different Bot API host (tests).
    pub fn with_telegram_base(mut self, base: impl Into<String>) -> Self {
        self.telegram_base = base.into();
        self
    }

    pub fn invalidate_cache(&self) {
        *self.telegram_cache.lock().unwrap() = None;
    }

    /// Active telegram_config row, cached until invalidated.
    pub fn telegram_settings(&self) -> Option<TelegramSettings> {
        {
            let cache = self.telegram_cache.lock().unwrap();
            if let Some(ref cached) = *cache {
                return cached.clone();
            }
        }

        let settings = self
            .store
            .query_one(
                "SELECT bot_token, chat_id, webhook_secret FROM telegram_config
                 WHERE is_active = 1 LIMIT 1",
                &[],
            )
            .ok()
            .flatten()
            .map(|row| TelegramSettings {
                bot_token: row.str_or("bot_token", ""),
                chat_id: row.str_opt("chat_id").map(str::to_string),
                webhook_secret: row.str_opt("webhook_secret").map(str::to_string),
            });

        *self.telegram_cache.lock().unwrap() = Some(settings.clone());
        settings
    }

    fn result(
        &self,
        success: bool,
        channel: &str,
        message: &str,
        error: Option<String>,
    ) -> NotificationResult {
        if let Some(ref e) = error {
            warn!(channel, error = %e, "notification failed");
        }
        NotificationResult {
            automation: self.automation.clone(),
            success,
            channel: channel.to_string(),
            message: message.to_string(),
            error,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Send `message` to a Telegram chat with HTML formatting. Falls back to
    /// the configured default chat when `chat_id` is None.
    pub async fn send_telegram(&self, message: &str, chat_id: Option<&str>) -> NotificationResult {
        let Some(settings) = self.telegram_settings() else {
            return self.result(false, "telegram", message, Some("telegram not configured".into()));
        };
        let Some(target) = chat_id
            .map(str::to_string)
            .or_else(|| settings.chat_id.clone())
        else {
            return self.result(false, "telegram", message, Some("no chat_id".into()));
        };

        let url = format!(
            "{}/bot{}/sendMessage",
            self.telegram_base, settings.bot_token
        );
        let body = json!({
            "chat_id": target,
            "text": message,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(&url)
            .timeout(HTTP_TIMEOUT)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                let payload: Value = resp.json().await.unwrap_or(Value::Null);
                if status.is_success() && payload.get("ok") == Some(&Value::Bool(true)) {
                    self.result(true, "telegram", message, None)
                } else {
                    self.result(
                        false,
                        "telegram",
                        message,
                        Some(format!("status {status}: {payload}")),
                    )
                }
            }
            Err(e) => self.result(false, "telegram", message, Some(e.to_string())),
        }
    }

    /// POST an arbitrary JSON payload to a webhook URL.
    pub async fn send_webhook(&self, url: &str, payload: &Value) -> NotificationResult {
        let preview: String = payload.to_string().chars().take(100).collect();
        let response = self
            .client
            .post(url)
            .timeout(HTTP_TIMEOUT)
            .json(payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => self.result(true, "webhook", &preview, None),
            Ok(resp) => self.result(
                false,
                "webhook",
                &preview,
                Some(format!("status {}", resp.status())),
            ),
            Err(e) => self.result(false, "webhook", &preview, Some(e.to_string())),
        }
    }

    /// Fan a plain message out to the given channels.
    pub async fn notify(&self, message: &str, channels: &[&str]) -> Vec<NotificationResult> {
        let mut results = Vec::new();
        for channel in channels {
            match *channel {
                "telegram" => results.push(self.send_telegram(message, None).await),
                other => results.push(self.result(
                    false,
                    other,
                    message,
                    Some(format!("unknown channel: {other}")),
                )),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_store::now_rfc3339;

    fn service_with_config(active: bool) -> NotificationService {
        let store = Store::open_in_memory().unwrap();
        store
            .exec(
                "INSERT INTO telegram_config (bot_token, chat_id, is_active, created_at, updated_at)
                 VALUES ('123:abc', '42', ?1, ?2, ?2)",
                &[&(active as i64), &now_rfc3339()],
            )
            .unwrap();
        NotificationService::new(store, "tests")
    }

    #[test]
    fn telegram_settings_come_from_the_active_row() {
        let service = service_with_config(true);
        let settings = service.telegram_settings().unwrap();
        assert_eq!(settings.bot_token, "123:abc");
        assert_eq!(settings.chat_id.as_deref(), Some("42"));
    }

    #[test]
    fn inactive_config_yields_none() {
        let service = service_with_config(false);
        assert!(service.telegram_settings().is_none());
    }

    #[test]
    fn cache_is_invalidatable() {
        let service = service_with_config(true);
        assert!(service.telegram_settings().is_some());

        service
            .store
            .exec("UPDATE telegram_config SET is_active = 0", &[])
            .unwrap();
        // Still cached.
        assert!(service.telegram_settings().is_some());
        service.invalidate_cache();
        assert!(service.telegram_settings().is_none());
    }

    #[tokio::test]
    async fn missing_config_fails_softly() {
        let store = Store::open_in_memory().unwrap();
        let service = NotificationService::new(store, "tests");
        let result = service.send_telegram("hallo", None).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("not configured"));
    }
}
