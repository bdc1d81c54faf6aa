//! Rule/validation runner: executes a list of command-based rules inside a sandbox and
//! produces a structured verdict.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::worktree::Sandbox;

/// One rule: a named command, whether its failure gates overall success, and an optional
/// per-rule timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub command: String,
    pub must_pass: bool,
    pub timeout: Option<Duration>,
}

impl Rule {
    pub fn new(name: impl Into<String>, command: impl Into<String>, must_pass: bool) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            must_pass,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub name: String,
    pub must_pass: bool,
    pub outcome: RuleOutcome,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOutcome {
    Passed,
    Failed,
    TimedOut,
}

/// Overall verdict across every rule run against one sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunVerdict {
    pub passed: bool,
    pub results: Vec<RuleResult>,
}

const DEFAULT_RULE_TIMEOUT: Duration = Duration::from_secs(120);

/// Run every rule against `sandbox` in order, returning a structured verdict. A forced
/// termination on timeout is classified as a failure. Non-must-pass failures are recorded but
/// do not gate overall success; any must-pass failure fails the whole run.
pub async fn run_rules(sandbox: &Sandbox, rules: &[Rule]) -> RunVerdict {
    let mut results = Vec::with_capacity(rules.len());
    let mut passed = true;

    for rule in rules {
        let mut parts = rule.command.split_whitespace();
        let Some(cmd) = parts.next() else {
            results.push(RuleResult {
                name: rule.name.clone(),
                must_pass: rule.must_pass,
                outcome: RuleOutcome::Failed,
                output: "empty command string".to_string(),
            });
            if rule.must_pass {
                passed = false;
            }
            continue;
        };
        let args: Vec<String> = parts.map(|s| s.to_string()).collect();
        let deadline = rule.timeout.unwrap_or(DEFAULT_RULE_TIMEOUT);

        let (outcome, output) = match timeout(deadline, sandbox.execute(cmd, &args)).await {
            Ok(exec) if exec.success() => (RuleOutcome::Passed, exec.output),
            Ok(exec) => (RuleOutcome::Failed, exec.output),
            Err(_) => (RuleOutcome::TimedOut, format!("rule '{}' timed out", rule.name)),
        };

        if outcome != RuleOutcome::Passed && rule.must_pass {
            passed = false;
        }
        results.push(RuleResult {
            name: rule.name.clone(),
            must_pass: rule.must_pass,
            outcome,
            output,
        });
    }

    RunVerdict { passed, results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worktree::SandboxManager;

    #[tokio::test]
    async fn a_failing_must_pass_rule_fails_the_whole_run() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(tmp.path());
        let sandbox = manager.create_worktree(None).await.unwrap();

        let rules = vec![
            Rule::new("always-ok", "true", true),
            Rule::new("always-fails", "false", true),
        ];
        let verdict = run_rules(&sandbox, &rules).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.results[0].outcome, RuleOutcome::Passed);
        assert_eq!(verdict.results[1].outcome, RuleOutcome::Failed);
    }

    #[tokio::test]
    async fn a_failing_non_must_pass_rule_does_not_gate_success() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(tmp.path());
        let sandbox = manager.create_worktree(None).await.unwrap();

        let rules = vec![Rule::new("lint-warning-only", "false", false)];
        let verdict = run_rules(&sandbox, &rules).await;
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn a_timeout_is_classified_as_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(tmp.path());
        let sandbox = manager.create_worktree(None).await.unwrap();

        let rules = vec![Rule::new("slow", "sleep 5", true).with_timeout(Duration::from_millis(50))];
        let verdict = run_rules(&sandbox, &rules).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.results[0].outcome, RuleOutcome::TimedOut);
    }
}
