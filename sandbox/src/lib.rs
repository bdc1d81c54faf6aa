//! Git-worktree-backed isolated execution sandboxes.
//!
//! Each sandbox is a working copy at its own filesystem path, anchored on its own
//! source-control branch, so concurrent agents editing the same base commit never collide.
//! When the sandbox base directory is not inside a git repository, worktree creation falls back
//! to a plain isolated directory copy rather than failing outright.

pub mod error;
pub mod rules;
pub mod worktree;

pub use error::SandboxError;
pub use rules::{Rule, RuleOutcome, RuleResult, RunVerdict};
pub use worktree::{ExecutionResult, Sandbox, SandboxManager, SandboxStrategy};
