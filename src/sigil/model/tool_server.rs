//! `tool-server-backed`: a `Model` variant that resolves a logical server name through the
//! process supervisor and dispatches `completion/complete` over the protocol. Dispatch goes
//! through the supervisor's pool rather than holding a dedicated connection (see `DESIGN.md`).

use async_trait::async_trait;
use serde_json::{json, Value};

use sigil_mcp::ProcessSupervisor;
use std::sync::Arc;

use crate::sigil::client_wrapper::Role;
use crate::sigil::error::SigilError;
use crate::sigil::model::{Model, ModelCapabilities, PromptInput, PromptOutput};

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool { .. } => "tool",
    }
}

/// Dispatches completions to a tool-server through the process supervisor's connection pool.
/// `run_prompt` fails with a network-class [`SigilError`] whenever the underlying server is
/// disconnected or the pool cannot be acquired.
pub struct ToolServerBackedModel {
    supervisor: Arc<ProcessSupervisor>,
    server_name: String,
    model_name: String,
    capabilities: ModelCapabilities,
}

impl ToolServerBackedModel {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        server_name: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            supervisor,
            server_name: server_name.into(),
            model_name: model_name.into(),
            capabilities: ModelCapabilities {
                max_tokens: 32_768,
                supports_images: false,
                supports_tools: true,
                supports_streaming: true,
            },
        }
    }

    fn params(&self, input: &PromptInput) -> Value {
        let messages: Vec<Value> = input
            .to_messages()
            .into_iter()
            .map(|m| {
                json!({
                    "role": role_str(m.role),
                    "content": m.content.to_string(),
                })
            })
            .collect();

        json!({
            "model": self.model_name,
            "messages": messages,
            "max_tokens": input.max_tokens,
            "temperature": input.temperature,
        })
    }
}

#[async_trait]
impl Model for ToolServerBackedModel {
    async fn run_prompt(&self, input: PromptInput) -> Result<PromptOutput, SigilError> {
        let params = self.params(&input);

        let conn = self
            .supervisor
            .get_pooled_connection(&self.server_name)
            .await
            .map_err(|e| SigilError::network("tool-server-run-prompt", e.to_string()))?;

        let result = conn.protocol.complete(params).await;

        // The pool entry is returned regardless of call outcome so a failed completion never
        // leaks a permanently in-use slot.
        self.supervisor.release_connection(conn).await;

        let result =
            result.map_err(|e| SigilError::network("tool-server-run-prompt", e.to_string()))?;

        let text = result
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tokens_used = result
            .get("tokens_used")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        Ok(PromptOutput {
            text,
            tokens_used,
            model: self.model_name.clone(),
            metadata: Default::default(),
        })
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}
