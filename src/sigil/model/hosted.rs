//! Hosted provider variants of the `Model` contract: thin adapters over the
//! [`ClientWrapper`] implementations for the two hosted provider families.

use async_trait::async_trait;

use crate::sigil::client_wrapper::ClientWrapper;
use crate::sigil::clients::claude::ClaudeClient;
use crate::sigil::clients::openai::OpenAIClient;
use crate::sigil::error::SigilError;
use crate::sigil::model::{Model, ModelCapabilities, PromptInput, PromptOutput};

/// `hosted-A`: an OpenAI-compatible chat-completions backend.
pub struct HostedAModel {
    client: OpenAIClient,
    name: String,
    capabilities: ModelCapabilities,
}

impl HostedAModel {
    pub fn new(client: OpenAIClient, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            capabilities: ModelCapabilities {
                max_tokens: 128_000,
                supports_images: true,
                supports_tools: true,
                supports_streaming: true,
            },
        }
    }
}

#[async_trait]
impl Model for HostedAModel {
    async fn run_prompt(&self, input: PromptInput) -> Result<PromptOutput, SigilError> {
        let messages = input.to_messages();
        let response = self
            .client
            .send_message(&messages, None)
            .await
            .map_err(|e| SigilError::network("hosted-a-run-prompt", e.to_string()))?;
        Ok(PromptOutput {
            text: response.content.to_string(),
            tokens_used: 0,
            model: self.name.clone(),
            metadata: Default::default(),
        })
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// `hosted-B`: an Anthropic-compatible messages backend.
pub struct HostedBModel {
    client: ClaudeClient,
    name: String,
    capabilities: ModelCapabilities,
}

impl HostedBModel {
    pub fn new(client: ClaudeClient, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            capabilities: ModelCapabilities {
                max_tokens: 200_000,
                supports_images: true,
                supports_tools: true,
                supports_streaming: true,
            },
        }
    }
}

#[async_trait]
impl Model for HostedBModel {
    async fn run_prompt(&self, input: PromptInput) -> Result<PromptOutput, SigilError> {
        let messages = input.to_messages();
        let response = self
            .client
            .send_message(&messages, None)
            .await
            .map_err(|e| SigilError::network("hosted-b-run-prompt", e.to_string()))?;
        Ok(PromptOutput {
            text: response.content.to_string(),
            tokens_used: 0,
            model: self.name.clone(),
            metadata: Default::default(),
        })
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    fn name(&self) -> &str {
        &self.name
    }
}
