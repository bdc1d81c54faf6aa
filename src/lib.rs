// src/lib.rs

pub mod sigil;

// Module-level re-exports so internal `crate::client_wrapper::...` / `crate::clients::...`
// paths resolve from the crate root without spelling out `crate::sigil::...`.
pub use sigil::client_wrapper;
pub use sigil::clients;
pub use sigil::thought_chain;

// Re-export the core public API at crate level so callers don't have to spell out the full
// module path for the types they touch most often.
pub use sigil::agent::{Agent, AgentRole, Capability, ProposalExtractor, Specialization};
pub use sigil::client_wrapper::{ClientWrapper, Message, Role};
pub use sigil::config::SigilConfig;
pub use sigil::consensus::{Conflict, Consensus, Resolution, ResolutionMethod};
pub use sigil::error::{ErrorKind, SigilError};
pub use sigil::event::{EventBus, OrchestrationEvent};
pub use sigil::memory::{FileMemoryStore, MemoryEntry, MemoryStore};
pub use sigil::model::{Model, ModelCapabilities, PromptInput, PromptOutput};
pub use sigil::orchestration_result::OrchestrationResult;
pub use sigil::orchestrator::{Orchestrator, OrchestratorMetrics};
pub use sigil::proposal::{Change, Proposal, Transformation};
pub use sigil::registry::{ModelFactory, ModelRegistry};
pub use sigil::result::{AgentResult, ResultStatus};
pub use sigil::review::{Comment, CommentType, ReviewDecision, ReviewResult};
pub use sigil::task::{Context, FileReference, Priority, Task, TaskType};

// The validation runner and sandbox worktree manager live in the `sandbox` workspace member;
// re-exported here so callers don't need a separate `sandbox = "..."` dependency line.
pub use sandbox::{ExecutionResult, Rule, RuleOutcome, RuleResult, RunVerdict, Sandbox, SandboxManager};
pub use sigil_mcp::{ManagedServer, PoolStatus, ProcessSupervisor, Protocol, ServerConfig};
