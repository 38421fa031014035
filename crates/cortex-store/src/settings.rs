//! DB-backed configuration: system settings and language mappings.
//!
//! Read-mostly; a short TTL cache keeps the hot pipeline paths off the DB.
//! Writers go through the DB and call `invalidate`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::Result;
use crate::store::{now_rfc3339, RowExt, Store};

const CACHE_TTL: Duration = Duration::from_secs(60);

pub struct ConfigManager {
    store: Store,
    cache: Mutex<HashMap<String, (Instant, Value)>>,
}

impl ConfigManager {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn invalidate(&self) {
        self.cache.lock().unwrap().clear();
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let cache = self.cache.lock().unwrap();
        cache
            .get(key)
            .filter(|(at, _)| at.elapsed() < CACHE_TTL)
            .map(|(_, v)| v.clone())
    }

    fn remember(&self, key: String, value: Value) {
        self.cache.lock().unwrap().insert(key, (Instant::now(), value));
    }

    /// Fetch a system setting, falling back to `default` when absent.
    pub fn get_setting(&self, key: &str, default: Value) -> Value {
        let cache_key = format!("setting:{key}");
        if let Some(v) = self.cached(&cache_key) {
            return v;
        }

        let value = self
            .store
            .query_one(
                "SELECT setting_value FROM system_settings WHERE setting_key = ?1",
                &[&key],
            )
            .ok()
            .flatten()
            .and_then(|row| row.str_opt("setting_value").map(unwrap_json))
            .unwrap_or(default);

        self.remember(cache_key, value.clone());
        value
    }

    pub fn set_setting(&self, key: &str, value: &Value, description: Option<&str>) -> Result<()> {
        let json = value.to_string();
        let now = now_rfc3339();
        self.store.exec(
            "INSERT INTO system_settings (setting_key, setting_value, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(setting_key)
             DO UPDATE SET setting_value = ?2, updated_at = ?4",
            &[&key, &json, &description, &now],
        )?;
        self.invalidate();
        Ok(())
    }

    /// Fetch one language mapping value, or None when absent/inactive.
    pub fn get_mapping(&self, mapping_type: &str, mapping_key: &str, language: &str) -> Option<Value> {
        let cache_key = format!("mapping:{mapping_type}:{mapping_key}:{language}");
        if let Some(v) = self.cached(&cache_key) {
            return if v.is_null() { None } else { Some(v) };
        }

        let value = self
            .store
            .query_one(
                "SELECT mapping_value FROM language_mappings
                 WHERE mapping_type = ?1 AND mapping_key = ?2 AND language = ?3 AND is_active = 1",
                &[&mapping_type, &mapping_key, &language],
            )
            .ok()
            .flatten()
            .and_then(|row| row.str_opt("mapping_value").map(unwrap_json));

        self.remember(cache_key, value.clone().unwrap_or(Value::Null));
        value
    }

    /// All active mappings of one type for a language, keyed by mapping_key.
    pub fn all_mappings(&self, mapping_type: &str, language: &str) -> HashMap<String, Value> {
        let rows = self
            .store
            .query(
                "SELECT mapping_key, mapping_value FROM language_mappings
                 WHERE mapping_type = ?1 AND language = ?2 AND is_active = 1",
                &[&mapping_type, &language],
            )
            .unwrap_or_default();

        rows.into_iter()
            .filter_map(|row| {
                let key = row.str_opt("mapping_key")?.to_string();
                let value = row.str_opt("mapping_value").map(unwrap_json)?;
                Some((key, value))
            })
            .collect()
    }

    pub fn stopwords(&self, language: &str) -> Vec<String> {
        string_list(self.get_mapping("stopwords", "default", language))
    }

    pub fn completion_keywords(&self, language: &str) -> Vec<String> {
        string_list(self.get_mapping("completion", "default", language))
    }

    pub fn deletion_keywords(&self, language: &str) -> Vec<String> {
        string_list(self.get_mapping("deletion", "default", language))
    }

    /// Priority keyword lists keyed by level ("high", "low", …).
    pub fn priority_keywords(&self, language: &str) -> HashMap<String, Value> {
        self.all_mappings("priority", language)
    }

    pub fn timezone(&self) -> String {
        match self.get_setting("timezone", Value::Null) {
            Value::String(s) => s,
            _ => cortex_core::config::DEFAULT_TIMEZONE.to_string(),
        }
    }

    pub fn confidence_threshold(&self, default: f64) -> f64 {
        self.get_setting("confidence_threshold", Value::Null)
            .as_f64()
            .unwrap_or(default)
    }
}

/// String settings that contain JSON come back as the parsed value.
fn unwrap_json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setting_round_trips_and_parses_json() {
        let store = Store::open_in_memory().unwrap();
        let config = ConfigManager::new(store);

        config
            .set_setting("confidence_threshold", &json!(0.5), Some("pipeline gate"))
            .unwrap();
        assert_eq!(config.confidence_threshold(0.3), 0.5);
    }

    #[test]
    fn missing_setting_yields_default() {
        let store = Store::open_in_memory().unwrap();
        let config = ConfigManager::new(store);
        assert_eq!(config.get_setting("nope", json!(42)), json!(42));
        assert_eq!(config.timezone(), "Europe/Berlin");
    }

    #[test]
    fn stopwords_come_from_language_mappings() {
        let store = Store::open_in_memory().unwrap();
        store
            .exec(
                "INSERT INTO language_mappings
                 (mapping_type, mapping_key, language, mapping_value, created_at, updated_at)
                 VALUES ('stopwords', 'default', 'de', '[\"der\",\"die\",\"das\"]', ?1, ?1)",
                &[&now_rfc3339()],
            )
            .unwrap();

        let config = ConfigManager::new(store);
        assert_eq!(config.stopwords("de"), vec!["der", "die", "das"]);
        assert!(config.stopwords("en").is_empty());
    }

    #[test]
    fn inactive_mappings_are_ignored() {
        let store = Store::open_in_memory().unwrap();
        store
            .exec(
                "INSERT INTO language_mappings
                 (mapping_type, mapping_key, language, mapping_value, is_active, created_at, updated_at)
                 VALUES ('completion', 'default', 'de', '[\"fertig\"]', 0, ?1, ?1)",
                &[&now_rfc3339()],
            )
            .unwrap();

        let config = ConfigManager::new(store);
        assert!(config.completion_keywords("de").is_empty());
    }
}
