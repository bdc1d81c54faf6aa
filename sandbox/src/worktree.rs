//! Sandbox worktrees: isolated working copies anchored on a unique source-control branch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};

use crate::error::SandboxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxStrategy {
    /// Created via `git worktree add -b <branch> <path> <base_ref>`.
    GitWorktree,
    /// Plain directory copy; used when the sandbox base has no `.git` to anchor to.
    IsolatedDir,
}

/// The result of running a command inside a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub command: String,
    pub sandbox_id: String,
    pub output: String,
    pub exit_code: i32,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One isolated working copy. No two live sandboxes share a path; `cleanup` removes both the
/// directory and the derived branch (when git-backed).
pub struct Sandbox {
    pub id: String,
    pub path: PathBuf,
    pub branch: Option<String>,
    pub strategy: SandboxStrategy,
    pub base_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    repo_root: Option<PathBuf>,
    last_used: Mutex<DateTime<Utc>>,
}

impl Sandbox {
    async fn touch(&self) {
        *self.last_used.lock().await = Utc::now();
    }

    pub async fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock().await
    }

    /// Execute a command with its working directory set to this sandbox's path. Captures
    /// combined stdout/stderr; a non-exit spawn error maps to exit code 1.
    pub async fn execute(&self, cmd: &str, args: &[String]) -> ExecutionResult {
        self.touch().await;
        let command_str = format!("{} {}", cmd, args.join(" "));
        match Command::new(cmd).args(args).current_dir(&self.path).output().await {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                ExecutionResult {
                    command: command_str,
                    sandbox_id: self.id.clone(),
                    output: combined,
                    exit_code: output.status.code().unwrap_or(1),
                    timestamp: Utc::now(),
                    error: None,
                }
            }
            Err(e) => ExecutionResult {
                command: command_str,
                sandbox_id: self.id.clone(),
                output: String::new(),
                exit_code: 1,
                timestamp: Utc::now(),
                error: Some(e.to_string()),
            },
        }
    }

    pub async fn write_file(&self, rel_path: &str, content: &str) -> Result<(), SandboxError> {
        self.touch().await;
        let target = self.path.join(rel_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, content).await?;
        Ok(())
    }

    pub async fn read_file(&self, rel_path: &str) -> Result<String, SandboxError> {
        self.touch().await;
        Ok(tokio::fs::read_to_string(self.path.join(rel_path)).await?)
    }

    /// A textual diff of uncommitted changes against the sandbox's base ref. Only meaningful
    /// for git-backed sandboxes; isolated-dir sandboxes have no VCS to diff against.
    pub async fn get_changes(&self) -> Result<String, SandboxError> {
        self.touch().await;
        match self.strategy {
            SandboxStrategy::GitWorktree => run_git(&self.path, &["diff", "HEAD"]).await,
            SandboxStrategy::IsolatedDir => Ok(String::new()),
        }
    }

    pub async fn commit(&self, message: &str) -> Result<(), SandboxError> {
        self.touch().await;
        match self.strategy {
            SandboxStrategy::GitWorktree => {
                run_git(&self.path, &["add", "-A"]).await?;
                run_git(&self.path, &["commit", "-m", message]).await?;
                Ok(())
            }
            SandboxStrategy::IsolatedDir => Err(SandboxError::Git(
                "commit is not supported for isolated-dir sandboxes".to_string(),
            )),
        }
    }

    /// Remove the working copy and (best-effort) its derived branch. Idempotent: a second
    /// call against an already-removed path is a no-op, not an error.
    pub async fn cleanup(&self) -> Result<(), SandboxError> {
        if self.path.exists() {
            match (self.strategy, &self.repo_root) {
                (SandboxStrategy::GitWorktree, Some(repo_root)) => {
                    let path_str = self.path.to_string_lossy().into_owned();
                    if let Err(e) = run_git(repo_root, &["worktree", "remove", "--force", &path_str]).await
                    {
                        log::warn!("worktree remove failed for {}: {}", self.id, e);
                        tokio::fs::remove_dir_all(&self.path).await.ok();
                    }
                }
                _ => {
                    tokio::fs::remove_dir_all(&self.path).await.ok();
                }
            }
        }
        if let (Some(branch), Some(repo_root)) = (&self.branch, &self.repo_root) {
            if let Err(e) = run_git(repo_root, &["branch", "-D", branch]).await {
                log::warn!("branch delete failed for {}: {}", branch, e);
            }
        }
        Ok(())
    }
}

async fn run_git(dir: &Path, args: &[&str]) -> Result<String, SandboxError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| SandboxError::Git(e.to_string()))?;
    if !output.status.success() {
        return Err(SandboxError::Git(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn run_git_in_root(root: &Path, args: &[String]) -> Result<String, SandboxError> {
    let refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    run_git(root, &refs).await
}

fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

fn make_id() -> String {
    let secs = Utc::now().timestamp();
    let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("{}-{}", secs, suffix)
}

async fn copy_tree(src: &Path, dst: &Path, exclude: &Path) -> Result<(), SandboxError> {
    tokio::fs::create_dir_all(dst).await?;
    let mut entries = tokio::fs::read_dir(src).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path == exclude {
            continue;
        }
        let file_name = entry.file_name();
        if file_name == ".git" {
            continue;
        }
        let target = dst.join(&file_name);
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            Box::pin(copy_tree(&path, &target, exclude)).await?;
        } else if file_type.is_file() {
            tokio::fs::copy(&path, &target).await?;
        }
    }
    Ok(())
}

/// Owns every active sandbox under a common base directory. Mutating operations (`create`,
/// `cleanup`) hold the manager's writer lock; reads (`get`, `list`) hold the reader lock. Each
/// sandbox additionally serializes its own mutating operations; distinct sandboxes are
/// independent of one another.
pub struct SandboxManager {
    base_dir: PathBuf,
    repo_root: Option<PathBuf>,
    sandboxes: RwLock<HashMap<String, Arc<Sandbox>>>,
}

impl SandboxManager {
    /// `project_root` is the directory sandboxes are isolated copies *of*. If it (or an
    /// ancestor) contains `.git`, sandboxes are git worktrees off that repository; otherwise
    /// each sandbox is a plain recursive copy of `project_root`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let repo_root = find_git_root(&project_root);
        Self {
            base_dir: project_root,
            repo_root,
            sandboxes: RwLock::new(HashMap::new()),
        }
    }

    fn sandboxes_dir(&self) -> PathBuf {
        self.base_dir.join(".sigil-sandboxes")
    }

    pub async fn create_worktree(&self, branch_hint: Option<&str>) -> Result<Arc<Sandbox>, SandboxError> {
        let id = make_id();
        let sandboxes_dir = self.sandboxes_dir();
        tokio::fs::create_dir_all(&sandboxes_dir).await?;
        let path = sandboxes_dir.join(&id);
        let branch_name = format!("sandbox-{}", id);

        let sandbox = if let Some(repo_root) = &self.repo_root {
            let path_str = path.to_string_lossy().into_owned();
            let base_ref = branch_hint
                .map(|s| s.to_string())
                .unwrap_or_else(|| "HEAD".to_string());
            let resolved_ref = run_git_in_root(repo_root, &["rev-parse".to_string(), base_ref.clone()])
                .await?
                .trim()
                .to_string();
            run_git_in_root(
                repo_root,
                &[
                    "worktree".to_string(),
                    "add".to_string(),
                    "-b".to_string(),
                    branch_name.clone(),
                    path_str,
                    base_ref,
                ],
            )
            .await?;
            Sandbox {
                id: id.clone(),
                path,
                branch: Some(branch_name),
                strategy: SandboxStrategy::GitWorktree,
                base_ref: Some(resolved_ref),
                created_at: Utc::now(),
                repo_root: Some(repo_root.clone()),
                last_used: Mutex::new(Utc::now()),
            }
        } else {
            copy_tree(&self.base_dir, &path, &sandboxes_dir).await?;
            Sandbox {
                id: id.clone(),
                path,
                branch: None,
                strategy: SandboxStrategy::IsolatedDir,
                base_ref: None,
                created_at: Utc::now(),
                repo_root: None,
                last_used: Mutex::new(Utc::now()),
            }
        };

        let sandbox = Arc::new(sandbox);
        self.sandboxes.write().await.insert(id, sandbox.clone());
        Ok(sandbox)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Sandbox>> {
        self.sandboxes.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Sandbox>> {
        self.sandboxes.read().await.values().cloned().collect()
    }

    /// Idempotent: cleaning an already-removed or unknown id is not an error.
    pub async fn cleanup(&self, id: &str) -> Result<(), SandboxError> {
        let sandbox = self.sandboxes.write().await.remove(id);
        if let Some(sandbox) = sandbox {
            sandbox.cleanup().await?;
        }
        Ok(())
    }

    /// Clean every sandbox whose last-used timestamp precedes `now - max_age`. Individual
    /// failures are logged and do not stop the sweep.
    pub async fn cleanup_older_than(&self, max_age: StdDuration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let candidates: Vec<String> = {
            let sandboxes = self.sandboxes.read().await;
            let mut ids = Vec::new();
            for (id, sandbox) in sandboxes.iter() {
                if sandbox.last_used().await < cutoff {
                    ids.push(id.clone());
                }
            }
            ids
        };
        for id in candidates {
            if let Err(e) = self.cleanup(&id).await {
                log::warn!("cleanup of sandbox {} failed: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn isolated_dir_sandboxes_are_independent() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::write(tmp.path().join("README.md"), "hello").await.unwrap();

        let manager = SandboxManager::new(tmp.path());
        let a = manager.create_worktree(None).await.unwrap();
        let b = manager.create_worktree(None).await.unwrap();

        a.write_file("a.txt", "from a").await.unwrap();
        b.write_file("a.txt", "from b").await.unwrap();

        assert_eq!(a.read_file("a.txt").await.unwrap(), "from a");
        assert_eq!(b.read_file("a.txt").await.unwrap(), "from b");
        assert_eq!(a.read_file("README.md").await.unwrap(), "hello");

        manager.cleanup(&a.id).await.unwrap();
        assert!(manager.get(&a.id).await.is_none());
        assert!(manager.get(&b.id).await.is_some());
        assert!(!a.path.exists());
        assert!(b.path.exists());
    }

    #[tokio::test]
    async fn cleanup_of_unknown_id_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(tmp.path());
        manager.cleanup("does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn execute_captures_exit_code_and_output() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(tmp.path());
        let sandbox = manager.create_worktree(None).await.unwrap();
        let result = sandbox
            .execute("sh", &["-c".to_string(), "echo hi && exit 3".to_string()])
            .await;
        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("hi"));
        assert!(!result.success());
    }
}
