//! OpenAI-compatible chat-completions client.
//!
//! Talks to any endpoint implementing the OpenAI chat-completions wire
//! contract (DeepSeek, vLLM, OpenRouter, the real thing). The endpoint,
//! model and key come from [`ModelConfig`](crate::config::ModelConfig).
//!
//! Transport and decode failures are reported as
//! [`ForgeError::ModelCommunication`]; the turn engine converts those into
//! assistant content rather than aborting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{ForgeError, Result};
use crate::llm::ChatModel;
use crate::session::Message;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl OpenAiCompatClient {
    /// Build a client from a validated [`ModelConfig`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the config is invalid or the API
    /// key cannot be resolved.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.resolve_api_key()?,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn complete(&self, context: &[Message], tools: &[Value]) -> Result<Message> {
        let request = ChatRequest {
            model: &self.model,
            messages: context,
            tools: if tools.is_empty() { None } else { Some(tools) },
            temperature: self.temperature,
        };

        debug!(
            model = %self.model,
            messages = context.len(),
            "requesting chat completion"
        );

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ForgeError::model(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForgeError::model(format!(
                "endpoint returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::model(format!("invalid completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ForgeError::model("completion response contained no choices"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ModelConfig {
        ModelConfig {
            base_url: "https://api.deepseek.com/v1/".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: Some("sk-test".to_string()),
            api_key_env: "MODFORGE_UNSET_KEY".to_string(),
            temperature: 0.4,
        }
    }

    #[test]
    fn test_from_config_trims_trailing_slash() {
        let client = OpenAiCompatClient::from_config(&test_config()).unwrap();
        assert_eq!(client.base_url, "https://api.deepseek.com/v1");
        assert_eq!(client.model_name(), "deepseek-chat");
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = test_config();
        config.base_url = String::new();
        assert!(OpenAiCompatClient::from_config(&config).is_err());
    }

    #[test]
    fn test_request_serialization_omits_empty_tools() {
        let messages = [Message::system("sys"), Message::user("hi")];
        let request = ChatRequest {
            model: "deepseek-chat",
            messages: &messages,
            tools: None,
            temperature: 1.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
        assert_eq!(json["messages"][0]["role"], "system");
    }

    #[test]
    fn test_response_deserialization() {
        let raw = r#"{
            "id": "cmpl-1",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {"role": "assistant", "content": "hello"}
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].message.content, "hello");
    }
}
