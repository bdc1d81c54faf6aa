//! `local`: a `Model` backed by a locally running completion daemon (e.g. Ollama, LM Studio)
//! speaking the OpenAI-compatible chat-completions HTTP shape, reached over a process-wide
//! shared [`reqwest::Client`] singleton.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sigil::clients::common::get_shared_http_client;
use crate::sigil::client_wrapper::Role;
use crate::sigil::error::SigilError;
use crate::sigil::model::{Model, ModelCapabilities, PromptInput, PromptOutput};

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool { .. } => "tool",
    }
}

/// A local-daemon backend, reached via HTTP at `base_url` (default `http://localhost:11434`,
/// Ollama's default listen address) under the OpenAI-compatible `/v1/chat/completions` path.
pub struct LocalModel {
    base_url: String,
    model_name: String,
}

impl LocalModel {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self::with_base_url("http://localhost:11434", model_name)
    }

    pub fn with_base_url(base_url: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl Model for LocalModel {
    async fn run_prompt(&self, input: PromptInput) -> Result<PromptOutput, SigilError> {
        let messages = input
            .to_messages()
            .into_iter()
            .map(|m| ChatMessage {
                role: role_str(m.role),
                content: m.content.to_string(),
            })
            .collect();

        let request = ChatRequest {
            model: self.model_name.clone(),
            messages,
            max_tokens: input.max_tokens,
            temperature: input.temperature,
        };

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let response = get_shared_http_client()
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SigilError::network("local-run-prompt", e.to_string()))?;

        if !response.status().is_success() {
            return Err(SigilError::network(
                "local-run-prompt",
                format!("local daemon returned status {}", response.status()),
            ));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| SigilError::network("local-run-prompt", e.to_string()))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SigilError::network("local-run-prompt", "empty choices array"))?;

        Ok(PromptOutput {
            text,
            tokens_used: body.usage.map(|u| u.total_tokens).unwrap_or(0),
            model: self.model_name.clone(),
            metadata: Default::default(),
        })
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            max_tokens: 8_192,
            supports_images: false,
            supports_tools: false,
            supports_streaming: false,
        }
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}
