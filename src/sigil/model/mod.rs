//! The uniform `Model` contract over heterogeneous completion backends.
//!
//! Widens [`crate::client_wrapper::ClientWrapper`] (a single request/response chat call) up to
//! the orchestrator's vocabulary: prior memory entries, referenced file contents, and a
//! deterministic prompt assembly shared by every provider variant, so no provider-specific
//! template logic needs to live in the core.

pub mod hosted;
pub mod local;
pub mod tool_server;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::sigil::client_wrapper::{Message, Role};
use crate::sigil::error::SigilError;
use crate::sigil::memory::MemoryEntry;
use crate::sigil::task::FileReference;

pub use hosted::{HostedAModel, HostedBModel};
pub use local::LocalModel;
pub use tool_server::ToolServerBackedModel;

/// Input to a single completion call: a system prompt, the user's prompt, prior memory turns,
/// referenced file contents, and generation parameters.
#[derive(Debug, Clone, Default)]
pub struct PromptInput {
    pub system_prompt: String,
    pub user_prompt: String,
    pub memory: Vec<MemoryEntry>,
    pub files: Vec<FileReference>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl PromptInput {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            memory: Vec::new(),
            files: Vec::new(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_memory(mut self, memory: Vec<MemoryEntry>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_files(mut self, files: Vec<FileReference>) -> Self {
        self.files = files;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Deterministic concatenation: the user text, then each referenced file as a
    /// `--- <path> ---\n<content>` block, each separated by a blank line.
    pub fn assembled_user_text(&self) -> String {
        let mut parts = vec![self.user_prompt.clone()];
        for file in &self.files {
            let content = file.content.as_deref().unwrap_or("");
            parts.push(format!("--- {} ---\n{}", file.path, content));
        }
        parts.join("\n\n")
    }

    /// Render the full message list a provider should be called with: system message, then
    /// each memory entry as a prior assistant turn in order, then the assembled user message.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.memory.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(Message {
                role: Role::System,
                content: std::sync::Arc::from(self.system_prompt.as_str()),
                tool_calls: vec![],
            });
        }
        for entry in &self.memory {
            messages.push(Message {
                role: Role::Assistant,
                content: std::sync::Arc::from(entry.body.as_str()),
                tool_calls: vec![],
            });
        }
        messages.push(Message {
            role: Role::User,
            content: std::sync::Arc::from(self.assembled_user_text().as_str()),
            tool_calls: vec![],
        });
        messages
    }
}

/// Output of a completion call: the textual response, tokens used, the model identifier that
/// produced it, and free-form provider metadata.
#[derive(Debug, Clone, Default)]
pub struct PromptOutput {
    pub text: String,
    pub tokens_used: u32,
    pub model: String,
    pub metadata: HashMap<String, String>,
}

/// What a backend supports, queried before routing work that needs a specific feature.
#[derive(Debug, Clone, Copy)]
pub struct ModelCapabilities {
    pub max_tokens: u32,
    pub supports_images: bool,
    pub supports_tools: bool,
    pub supports_streaming: bool,
}

/// The uniform contract every backend variant (hosted, local, tool-server-backed) satisfies.
#[async_trait]
pub trait Model: Send + Sync {
    async fn run_prompt(&self, input: PromptInput) -> Result<PromptOutput, SigilError>;
    fn capabilities(&self) -> ModelCapabilities;
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigil::task::FileReference;

    #[test]
    fn assembled_user_text_appends_file_blocks() {
        let input = PromptInput::new("sys", "fix the bug").with_files(vec![
            FileReference::new("a.rs").with_content("fn a() {}"),
        ]);
        let text = input.assembled_user_text();
        assert_eq!(text, "fix the bug\n\n--- a.rs ---\nfn a() {}");
    }

    #[test]
    fn to_messages_orders_system_memory_then_user() {
        let memory = vec![MemoryEntry::new("session", "earlier turn")];
        let input = PromptInput::new("be terse", "do the thing").with_memory(memory);
        let messages = input.to_messages();
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0].role, Role::System));
        assert!(matches!(messages[1].role, Role::Assistant));
        assert!(matches!(messages[2].role, Role::User));
    }
}
