//! Chat-completion clients implementing [`CompletionProvider`].
//!
//! Any OpenAI-compatible `/chat/completions` endpoint works (OpenAI,
//! Groq, vLLM, llama.cpp server). The API key is read from the
//! environment variable named by `completion.api_key_env`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use sitewatch_core::traits::CompletionProvider;
use sitewatch_core::WatchError;

use crate::config::CompletionConfig;
use crate::retry::post_json;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions accurately and concisely based only on the provided information.";

/// Always fails; summaries and answers fall back to their fixed messages.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    async fn complete(&self, _prompt: &str, _max_tokens: u32) -> sitewatch_core::Result<String> {
        Err(WatchError::completion("completion provider is disabled"))
    }
}

pub struct OpenAICompletion {
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for openai provider"))?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model,
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompletion {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> sitewatch_core::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": max_tokens,
            "temperature": self.temperature,
        });

        let json = post_json(
            &self.client,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "Completion",
        )
        .await
        .map_err(|e| WatchError::completion(format!("{:#}", e)))?;

        parse_chat_response(&json).map_err(|e| WatchError::completion(format!("{:#}", e)))
    }
}

/// `choices[0].message.content`, trimmed.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices[0].message.content"))?;
    Ok(content.trim().to_string())
}

pub fn create_completion(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  Prices dropped.\n"}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Prices dropped.");
    }

    #[test]
    fn test_parse_chat_response_missing_content() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_chat_response(&json).is_err());
    }

    #[tokio::test]
    async fn test_disabled_completion_errors() {
        let provider = create_completion(&CompletionConfig::default()).unwrap();
        let err = provider.complete("hi", 10).await.unwrap_err();
        assert_eq!(err.kind(), "completion_error");
    }

    #[test]
    fn test_missing_api_key_env() {
        let config = CompletionConfig {
            provider: "openai".into(),
            model: Some("m".into()),
            api_key_env: "SITEWATCH_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        let err = create_completion(&config).err().unwrap();
        assert!(err.to_string().contains("SITEWATCH_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
