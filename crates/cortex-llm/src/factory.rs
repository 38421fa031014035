use std::sync::Arc;

use cortex_store::Store;

use crate::anthropic::AnthropicClient;
use crate::client::LlmClient;
use crate::error::{LlmError, Result};
use crate::google::GoogleClient;
use crate::keys::resolve_api_key;
use crate::openai::OpenAiClient;

pub const PROVIDERS: [&str; 3] = ["anthropic", "openai", "google"];

/// Build a client for `provider`, resolving the key from argument → DB → env.
pub fn build_client(
    store: &Store,
    provider: &str,
    api_key: Option<&str>,
) -> Result<Arc<dyn LlmClient>> {
    let provider = provider.to_ascii_lowercase();
    if !PROVIDERS.contains(&provider.as_str()) {
        return Err(LlmError::UnknownProvider(provider));
    }
    let key = resolve_api_key(store, &provider, api_key)?;

    let client: Arc<dyn LlmClient> = match provider.as_str() {
        "anthropic" => Arc::new(AnthropicClient::new(key, None)),
        "openai" => Arc::new(OpenAiClient::new(key, None)),
        "google" => Arc::new(GoogleClient::new(key, None)),
        _ => unreachable!(),
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_a_config_error() {
        let store = Store::open_in_memory().unwrap();
        let err = build_client(&store, "mistral", Some("sk-x")).unwrap_err();
        assert!(matches!(err, LlmError::UnknownProvider(_)));
    }

    #[test]
    fn known_provider_with_explicit_key_builds() {
        let store = Store::open_in_memory().unwrap();
        let client = build_client(&store, "Anthropic", Some("sk-x")).unwrap();
        assert_eq!(client.name(), "anthropic");
    }
}
