//! # LLM client
//!
//! Thin wrapper around [`async_openai`] for single-shot chat completions against any
//! OpenAI compatible endpoint. Every request is sent once: the client's retry backoff is
//! disabled, so a failing call surfaces its error immediately.

use crate::config::RagConfig;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
};
use std::time::Duration;
use tracing::debug;

/// Creates a new OpenAI API client from configuration.
///
/// # Parameters
/// - `config: &RagConfig`: Configuration containing API base and key.
///
/// # Returns
/// - `Client<OpenAIConfig>` that never retries failed requests.
pub fn create_client(config: &RagConfig) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());

    let no_retry = backoff::ExponentialBackoff {
        max_elapsed_time: Some(Duration::ZERO),
        ..Default::default()
    };

    Client::with_config(openai_config).with_backoff(no_retry)
}

/// Sampling knobs for a single completion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A chat model bound to a client.
#[derive(Clone)]
pub struct Llm {
    client: Client<OpenAIConfig>,
    model: String,
}

impl std::fmt::Debug for Llm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Llm").field("model", &self.model).finish()
    }
}

impl Llm {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// The chat model configured as `MODEL_NAME`.
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(create_client(config), config.model.clone())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `prompt` as a single user message.
    pub async fn complete(&self, prompt: &str) -> Result<String, OpenAIError> {
        self.chat(None, prompt, CompletionOptions::default()).await
    }

    /// Send an optional system message and one user message, returning the
    /// concatenated text of every choice.
    #[allow(deprecated)]
    pub async fn chat(
        &self,
        system: Option<&str>,
        user: &str,
        options: CompletionOptions,
    ) -> Result<String, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatCompletionRequestSystemMessage::from(system).into());
        }
        messages.push(ChatCompletionRequestUserMessage::from(user).into());

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone()).messages(messages);
        if let Some(temperature) = options.temperature {
            args.temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            args.max_tokens(max_tokens);
        }
        let request = args.build()?;

        debug!("Sending request: {:?}", request);

        let response = self.client.chat().create(request).await?;

        let mut response_string = String::new();
        for choice in response.choices {
            if let Some(text) = choice.message.content {
                response_string.push_str(&text);
            }
        }

        Ok(response_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn mock_config(api_base: String) -> RagConfig {
        RagConfig {
            api_key: "mock_api_key".to_string(),
            api_base,
            model: "mock_model".to_string(),
            ..RagConfig::default()
        }
    }

    #[tokio::test]
    async fn test_chat_sends_system_and_user_messages() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_includes("\"model\":\"mock_model\"")
                    .body_includes("be brief")
                    .body_includes("What is Rust?");
                then.status(200).json_body(json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 0,
                    "model": "mock_model",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "A language."},
                        "finish_reason": "stop"
                    }]
                }));
            })
            .await;

        let llm = Llm::from_config(&mock_config(server.base_url()));
        let answer = llm
            .chat(Some("be brief"), "What is Rust?", CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(answer, "A language.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(400).json_body(json!({
                    "error": {
                        "message": "bad request",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": null
                    }
                }));
            })
            .await;

        let llm = Llm::from_config(&mock_config(server.base_url()));
        let result = llm.complete("hello").await;

        assert!(result.is_err());
        assert_eq!(mock.calls_async().await, 1);
    }
}
