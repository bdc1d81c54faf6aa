//! Process-wide configuration: the YAML document, plus environment overrides and init-once
//! global access. Configuration is a first-class data model type here, not an out-of-process
//! concern left to callers.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sigil::error::SigilError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelsConfig {
    pub lead: String,
    #[serde(default)]
    pub reviewers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SandboxConfig {
    #[serde(default)]
    pub base_dir: Option<String>,
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub command: String,
    #[serde(default = "default_must_pass")]
    pub must_pass: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_must_pass() -> bool {
    true
}

impl RuleConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitConfig {
    #[serde(default)]
    pub repo_root: Option<String>,
}

/// One configured tool-server under `mcp.servers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub auto_restart: Option<bool>,
    #[serde(default)]
    pub max_restarts: Option<u32>,
    #[serde(default)]
    pub pool_size: Option<usize>,
}

impl McpServerConfig {
    /// Build a supervisor-ready [`sigil_mcp::ServerConfig`] for the server named `name`.
    pub fn into_server_config(self, name: &str) -> sigil_mcp::ServerConfig {
        let mut spawn = sigil_mcp::SpawnConfig::new(self.command);
        spawn.args = self.args;
        spawn.env = self.env;
        spawn.working_dir = self.working_dir;

        let mut config = sigil_mcp::ServerConfig::new(name, spawn);
        if let Some(auto_restart) = self.auto_restart {
            config.auto_restart = auto_restart;
        }
        if let Some(max_restarts) = self.max_restarts {
            config.max_restarts = max_restarts;
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// Sub-path, relative to each well-known base (home directory, project directory), of the
/// user- and project-scoped tool-server config files. Project overrides user.
const USER_MCP_CONFIG_SUBPATH: &str = ".sigil/mcp.yaml";
const PROJECT_MCP_CONFIG_SUBPATH: &str = USER_MCP_CONFIG_SUBPATH;

/// Cross-platform home directory lookup.
fn home_dir() -> Option<std::path::PathBuf> {
    if let Some(home) = std::env::var_os("HOME") {
        return Some(std::path::PathBuf::from(home));
    }
    if cfg!(target_os = "windows") {
        if let Some(profile) = std::env::var_os("USERPROFILE") {
            return Some(std::path::PathBuf::from(profile));
        }
    }
    None
}

fn read_mcp_servers(path: &Path) -> Option<HashMap<String, McpServerConfig>> {
    let text = fs::read_to_string(path).ok()?;
    if text.trim().is_empty() {
        return None;
    }
    match serde_yaml::from_str::<McpConfig>(&text) {
        Ok(config) => Some(config.servers),
        Err(e) => {
            log::warn!("mcp config '{}' is invalid: {}; skipped", path.display(), e);
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// The immutable process-wide configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SigilConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl SigilConfig {
    /// Parse a YAML document, then apply the recognized environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self, SigilError> {
        let mut config: SigilConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SigilError::config("parse-yaml", e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SigilError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            SigilError::config("read-file", e.to_string())
                .with_context("path", path.to_string_lossy())
        })?;
        Self::from_yaml(&text)
    }

    /// Merge in the two well-known tool-server config paths: a user-scoped file under the home
    /// directory and a project-scoped file under `project_dir`, the latter overriding the
    /// former. Entries already present under `mcp.servers` in this document (the explicit,
    /// in-band configuration) are never overwritten by either file.
    pub fn merge_well_known_mcp_servers(&mut self, project_dir: impl AsRef<Path>) {
        let mut discovered: HashMap<String, McpServerConfig> = HashMap::new();

        if let Some(home) = home_dir() {
            if let Some(servers) = read_mcp_servers(&home.join(USER_MCP_CONFIG_SUBPATH)) {
                discovered.extend(servers);
            }
        }

        let project_path = project_dir.as_ref().join(PROJECT_MCP_CONFIG_SUBPATH);
        if let Some(servers) = read_mcp_servers(&project_path) {
            // Project overrides user: insert unconditionally, not `entry().or_insert()`.
            discovered.extend(servers);
        }

        for (name, server) in discovered {
            self.mcp.servers.entry(name).or_insert(server);
        }
    }

    /// `SIGIL_MODEL` replaces `models.lead`; `SIGIL_LOG_LEVEL` replaces `logging.level`;
    /// `OPENAI_API_KEY`/`ANTHROPIC_API_KEY` populate the matching provider entries.
    fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("SIGIL_MODEL") {
            self.models.lead = model;
        }
        if let Ok(level) = std::env::var("SIGIL_LOG_LEVEL") {
            self.logging.level = Some(level);
        }
        if std::env::var("OPENAI_API_KEY").is_ok() {
            self.providers
                .entry("openai".to_string())
                .or_default()
                .api_key_env = Some("OPENAI_API_KEY".to_string());
        }
        if std::env::var("ANTHROPIC_API_KEY").is_ok() {
            self.providers
                .entry("anthropic".to_string())
                .or_default()
                .api_key_env = Some("ANTHROPIC_API_KEY".to_string());
        }
    }
}

static GLOBAL_CONFIG: OnceLock<RwLock<SigilConfig>> = OnceLock::new();

/// Install the process-wide configuration snapshot. Init-once: the first successful call wins,
/// every subsequent call fails with a config error rather than silently replacing state.
pub fn init_global(config: SigilConfig) -> Result<(), SigilError> {
    GLOBAL_CONFIG
        .set(RwLock::new(config))
        .map_err(|_| SigilError::config("init-global", "global configuration already initialized"))
}

/// Read the process-wide configuration snapshot. Panics if `init_global` has not run yet, since
/// every caller that needs config is expected to run after start-up has installed it.
pub fn global() -> std::sync::RwLockReadGuard<'static, SigilConfig> {
    GLOBAL_CONFIG
        .get()
        .expect("sigil configuration not initialized: call init_global first")
        .read()
        .expect("sigil configuration lock poisoned")
}

pub fn is_initialized() -> bool {
    GLOBAL_CONFIG.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
models:
  lead: "openai:gpt-4o"
  reviewers:
    - "anthropic:claude-3-5-sonnet"
sandbox:
  base_dir: "/tmp/sigil-sandboxes"
rules:
  - name: "clippy"
    command: "cargo clippy"
    must_pass: true
logging:
  level: "info"
"#;

    #[test]
    fn parses_minimal_document() {
        std::env::remove_var("SIGIL_MODEL");
        let config = SigilConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.models.lead, "openai:gpt-4o");
        assert_eq!(config.models.reviewers.len(), 1);
        assert_eq!(config.rules.len(), 1);
        assert!(config.rules[0].must_pass);
    }

    #[test]
    fn sigil_model_env_overrides_lead() {
        std::env::set_var("SIGIL_MODEL", "local:override-model");
        let config = SigilConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.models.lead, "local:override-model");
        std::env::remove_var("SIGIL_MODEL");
    }

    #[test]
    fn missing_optional_sections_default_empty() {
        std::env::remove_var("SIGIL_MODEL");
        let config = SigilConfig::from_yaml("models:\n  lead: \"openai:gpt-4o\"\n").unwrap();
        assert!(config.rules.is_empty());
        assert!(config.mcp.servers.is_empty());
    }

    #[test]
    fn well_known_mcp_files_merge_with_project_overriding_user() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let original_home = std::env::var_os("HOME");
        std::env::set_var("HOME", home.path());

        fs::create_dir_all(home.path().join(".sigil")).unwrap();
        fs::write(
            home.path().join(USER_MCP_CONFIG_SUBPATH),
            "servers:\n  filesystem:\n    command: \"user-fs-server\"\n  search:\n    command: \"user-search-server\"\n",
        )
        .unwrap();

        fs::create_dir_all(project.path().join(".sigil")).unwrap();
        fs::write(
            project.path().join(PROJECT_MCP_CONFIG_SUBPATH),
            "servers:\n  filesystem:\n    command: \"project-fs-server\"\n",
        )
        .unwrap();

        let mut config = SigilConfig::default();
        config.merge_well_known_mcp_servers(project.path());

        assert_eq!(config.mcp.servers["filesystem"].command, "project-fs-server");
        assert_eq!(config.mcp.servers["search"].command, "user-search-server");

        match original_home {
            Some(value) => std::env::set_var("HOME", value),
            None => std::env::remove_var("HOME"),
        }
    }

    #[test]
    fn well_known_mcp_files_never_override_explicit_inline_servers() {
        let home = tempfile::tempdir().unwrap();
        let original_home = std::env::var_os("HOME");
        std::env::set_var("HOME", home.path());
        fs::create_dir_all(home.path().join(".sigil")).unwrap();
        fs::write(
            home.path().join(USER_MCP_CONFIG_SUBPATH),
            "servers:\n  filesystem:\n    command: \"user-fs-server\"\n",
        )
        .unwrap();

        let mut config = SigilConfig::from_yaml(
            "mcp:\n  servers:\n    filesystem:\n      command: \"inline-fs-server\"\n",
        )
        .unwrap();
        config.merge_well_known_mcp_servers(tempfile::tempdir().unwrap().path());

        assert_eq!(config.mcp.servers["filesystem"].command, "inline-fs-server");

        match original_home {
            Some(value) => std::env::set_var("HOME", value),
            None => std::env::remove_var("HOME"),
        }
    }
}
