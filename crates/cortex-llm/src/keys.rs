//! API key resolution: explicit argument → api_keys table → environment.

use cortex_store::{RowExt, Store};
use tracing::debug;

use crate::error::{LlmError, Result};

fn env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "google" => Some("GOOGLE_API_KEY"),
        _ => None,
    }
}

/// Resolve the API key for `provider`.
///
/// Order: explicit argument, then the `api_keys` row (only when marked
/// valid), then the provider's environment variable.
pub fn resolve_api_key(store: &Store, provider: &str, explicit: Option<&str>) -> Result<String> {
    if let Some(key) = explicit {
        return Ok(key.to_string());
    }

    if let Ok(Some(row)) = store.query_one(
        "SELECT api_key FROM api_keys WHERE provider = ?1 AND valid = 1",
        &[&provider],
    ) {
        if let Some(key) = row.str_opt("api_key") {
            debug!(provider, "API key resolved from database");
            return Ok(key.to_string());
        }
    }

    if let Some(var) = env_var(provider) {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                debug!(provider, "API key resolved from environment");
                return Ok(key);
            }
        }
    }

    Err(LlmError::MissingKey(provider.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_store::now_rfc3339;

    #[test]
    fn explicit_key_wins() {
        let store = Store::open_in_memory().unwrap();
        let key = resolve_api_key(&store, "anthropic", Some("sk-explicit")).unwrap();
        assert_eq!(key, "sk-explicit");
    }

    #[test]
    fn db_key_is_used_when_valid() {
        let store = Store::open_in_memory().unwrap();
        store
            .exec(
                "INSERT INTO api_keys (provider, api_key, valid, created_at, updated_at)
                 VALUES ('openai', 'sk-db', 1, ?1, ?1)",
                &[&now_rfc3339()],
            )
            .unwrap();
        assert_eq!(resolve_api_key(&store, "openai", None).unwrap(), "sk-db");
    }

    #[test]
    fn invalid_db_key_is_skipped() {
        let store = Store::open_in_memory().unwrap();
        store
            .exec(
                "INSERT INTO api_keys (provider, api_key, valid, created_at, updated_at)
                 VALUES ('unknown_provider', 'sk-db', 0, ?1, ?1)",
                &[&now_rfc3339()],
            )
            .unwrap();
        let err = resolve_api_key(&store, "unknown_provider", None).unwrap_err();
        assert!(matches!(err, LlmError::MissingKey(_)));
    }
}
