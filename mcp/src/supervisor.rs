//! Process supervisor: owns a named set of [`Protocol`]-wrapped tool servers, their
//! connection pools, and a periodic health monitor with bounded, backed-off auto-restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::error::McpError;
use crate::protocol::{ClientInfo, Protocol};
use crate::transport::{SpawnConfig, StdioTransport, Transport, TransportState};

/// Default size of each logical server's shadow connection pool.
const DEFAULT_POOL_SIZE: usize = 3;
/// Default bound on restart attempts before a server is given up on.
const DEFAULT_MAX_RESTARTS: u32 = 3;
/// Health monitor tick interval.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

fn exponential_backoff(attempt: u32) -> Duration {
    let base_ms = 200u64;
    let max_ms = 10_000u64;
    Duration::from_millis((base_ms * 2u64.pow(attempt.min(8))).min(max_ms))
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub spawn: SpawnConfig,
    pub auto_restart: bool,
    pub max_restarts: u32,
    pub pool_size: usize,
    pub client_info: ClientInfo,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, spawn: SpawnConfig) -> Self {
        Self {
            name: name.into(),
            spawn,
            auto_restart: true,
            max_restarts: DEFAULT_MAX_RESTARTS,
            pool_size: DEFAULT_POOL_SIZE,
            client_info: ClientInfo {
                name: "sigil".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// A read-only snapshot of a supervised server's state, safe to hand out without holding any
/// lock.
#[derive(Debug, Clone)]
pub struct ManagedServer {
    pub name: String,
    pub restart_count: u32,
    pub last_error: Option<String>,
    pub healthy: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PoolStatus {
    pub capacity: usize,
    pub in_use: usize,
    pub idle: usize,
}

struct PoolEntry {
    protocol: Arc<Protocol>,
    in_use: AtomicBool,
    request_count: AtomicU64,
}

struct ServerEntry {
    config: ServerConfig,
    protocol: Mutex<Arc<Protocol>>,
    restart_count: AtomicU32,
    last_error: Mutex<Option<String>>,
    pool: Mutex<Vec<PoolEntry>>,
    health_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Owns every supervised tool-server subprocess. All mutating operations (`start`, `stop`,
/// `restart`) hold the supervisor's writer lock; reads (`get`, `list`) hold the reader lock.
/// Per-server mutable fields are additionally guarded by that server's own lock.
///
/// Held behind `Arc<ProcessSupervisor>` by convention (`new()` returns one already wrapped),
/// so the background health-monitor task spawned per server can keep a `Weak` reference back
/// to the supervisor without unsafe code or a `'static` lifetime assumption.
pub struct ProcessSupervisor {
    servers: RwLock<HashMap<String, Arc<ServerEntry>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            servers: RwLock::new(HashMap::new()),
        })
    }

    async fn spawn_and_handshake(config: &ServerConfig) -> Result<Arc<Protocol>, McpError> {
        let transport: Arc<dyn Transport> = Arc::new(StdioTransport::spawn(&config.spawn)?);
        let protocol = Protocol::new(transport.clone());
        match protocol.initialize(config.client_info.clone()).await {
            Ok(_) => Ok(protocol),
            Err(e) => {
                let _ = transport.close().await;
                Err(e)
            }
        }
    }

    /// Spawn and handshake a new server. Refuses duplicates. On handshake failure the
    /// transport is closed and no server is stored.
    pub async fn start(self: &Arc<Self>, config: ServerConfig) -> Result<(), McpError> {
        {
            let servers = self.servers.read().await;
            if servers.contains_key(&config.name) {
                return Err(McpError::AlreadyRunning(config.name.clone()));
            }
        }

        let protocol = Self::spawn_and_handshake(&config).await?;
        let name = config.name.clone();
        let auto_restart = config.auto_restart;
        let entry = Arc::new(ServerEntry {
            config,
            protocol: Mutex::new(protocol),
            restart_count: AtomicU32::new(0),
            last_error: Mutex::new(None),
            pool: Mutex::new(Vec::new()),
            health_task: Mutex::new(None),
        });

        {
            let mut servers = self.servers.write().await;
            servers.insert(name.clone(), entry.clone());
        }

        if auto_restart {
            self.spawn_health_task(name).await;
        }
        Ok(())
    }

    async fn spawn_health_task(self: &Arc<Self>, name: String) {
        let entry = {
            let servers = self.servers.read().await;
            match servers.get(&name).cloned() {
                Some(e) => e,
                None => return,
            }
        };

        let supervisor = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
                let healthy = {
                    let protocol = entry.protocol.lock().await;
                    protocol.transport_state() == TransportState::Connected
                };
                if healthy {
                    continue;
                }
                let attempt = entry.restart_count.load(Ordering::SeqCst);
                if attempt >= entry.config.max_restarts {
                    log::warn!(
                        "server '{}' exceeded max restarts ({}); removing",
                        entry.config.name,
                        entry.config.max_restarts
                    );
                    if let Some(supervisor) = supervisor.upgrade() {
                        supervisor.servers.write().await.remove(&entry.config.name);
                    }
                    break;
                }
                tokio::time::sleep(exponential_backoff(attempt)).await;
                match ProcessSupervisor::spawn_and_handshake(&entry.config).await {
                    Ok(new_protocol) => {
                        *entry.protocol.lock().await = new_protocol;
                        entry.restart_count.fetch_add(1, Ordering::SeqCst);
                        *entry.last_error.lock().await = None;
                    }
                    Err(e) => {
                        entry.restart_count.fetch_add(1, Ordering::SeqCst);
                        *entry.last_error.lock().await = Some(e.to_string());
                    }
                }
                // supervisor gone: no one can observe this server anymore, stop monitoring it
                if supervisor.upgrade().is_none() {
                    break;
                }
            }
        });
        if let Some(entry) = self.servers.read().await.get(&name) {
            *entry.health_task.lock().await = Some(task);
        }
    }

    pub async fn stop(&self, name: &str) -> Result<(), McpError> {
        let entry = {
            let mut servers = self.servers.write().await;
            servers.remove(name)
        };
        match entry {
            Some(entry) => {
                if let Some(task) = entry.health_task.lock().await.take() {
                    task.abort();
                }
                entry.protocol.lock().await.shutdown().await
            }
            None => Err(McpError::NotFound(name.to_string())),
        }
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        for name in names {
            let _ = self.stop(&name).await;
        }
    }

    pub async fn get(&self, name: &str) -> Option<ManagedServer> {
        let servers = self.servers.read().await;
        let entry = servers.get(name)?;
        Some(ManagedServer {
            name: entry.config.name.clone(),
            restart_count: entry.restart_count.load(Ordering::SeqCst),
            last_error: entry.last_error.lock().await.clone(),
            healthy: entry.protocol.lock().await.transport_state() == TransportState::Connected,
        })
    }

    pub async fn list(&self) -> Vec<ManagedServer> {
        let servers = self.servers.read().await;
        let mut out = Vec::with_capacity(servers.len());
        for entry in servers.values() {
            out.push(ManagedServer {
                name: entry.config.name.clone(),
                restart_count: entry.restart_count.load(Ordering::SeqCst),
                last_error: entry.last_error.lock().await.clone(),
                healthy: entry.protocol.lock().await.transport_state()
                    == TransportState::Connected,
            });
        }
        out
    }

    pub async fn restart(self: &Arc<Self>, name: &str) -> Result<(), McpError> {
        let config = {
            let servers = self.servers.read().await;
            servers
                .get(name)
                .map(|e| e.config.clone())
                .ok_or_else(|| McpError::NotFound(name.to_string()))?
        };
        self.stop(name).await.ok();
        self.start(config).await
    }

    /// Re-read server configurations and start any newly-present ones. Existing running
    /// servers whose configuration is unchanged are left alone.
    pub async fn reload_configurations(
        self: &Arc<Self>,
        configs: Vec<ServerConfig>,
    ) -> Vec<McpError> {
        let mut errors = Vec::new();
        for config in configs {
            let exists = self.servers.read().await.contains_key(&config.name);
            if !exists {
                if let Err(e) = self.start(config).await {
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Returns an existing idle pool entry, or spawns a new shadow instance up to the
    /// configured cap. Fails with `PoolFull` when at capacity with none free.
    pub async fn get_pooled_connection(&self, name: &str) -> Result<PooledConnection, McpError> {
        let entry = {
            let servers = self.servers.read().await;
            servers
                .get(name)
                .cloned()
                .ok_or_else(|| McpError::NotFound(name.to_string()))?
        };

        let mut pool = entry.pool.lock().await;
        for (index, slot) in pool.iter().enumerate() {
            if !slot.in_use.swap(true, Ordering::SeqCst) {
                slot.request_count.fetch_add(1, Ordering::SeqCst);
                return Ok(PooledConnection {
                    server_name: name.to_string(),
                    index,
                    protocol: slot.protocol.clone(),
                });
            }
        }

        if pool.len() >= entry.config.pool_size {
            return Err(McpError::PoolFull(name.to_string()));
        }

        let protocol = Self::spawn_and_handshake(&entry.config).await?;
        let index = pool.len();
        pool.push(PoolEntry {
            protocol: protocol.clone(),
            in_use: AtomicBool::new(true),
            request_count: AtomicU64::new(1),
        });
        Ok(PooledConnection {
            server_name: name.to_string(),
            index,
            protocol,
        })
    }

    /// Flip a pool entry's in-use flag back to idle. A subsequent `get_pooled_connection`
    /// always succeeds after this for a pool that was at capacity.
    pub async fn release_connection(&self, conn: PooledConnection) {
        let servers = self.servers.read().await;
        if let Some(entry) = servers.get(&conn.server_name) {
            let pool = entry.pool.lock().await;
            if let Some(slot) = pool.get(conn.index) {
                slot.in_use.store(false, Ordering::SeqCst);
            }
        }
    }

    pub async fn get_pool_status(&self, name: &str) -> Result<PoolStatus, McpError> {
        let servers = self.servers.read().await;
        let entry = servers
            .get(name)
            .ok_or_else(|| McpError::NotFound(name.to_string()))?;
        let pool = entry.pool.lock().await;
        let in_use = pool
            .iter()
            .filter(|e| e.in_use.load(Ordering::SeqCst))
            .count();
        Ok(PoolStatus {
            capacity: entry.config.pool_size,
            in_use,
            idle: pool.len() - in_use,
        })
    }

    pub async fn get_overall_health(&self) -> HashMap<String, bool> {
        let servers = self.servers.read().await;
        let mut out = HashMap::new();
        for entry in servers.values() {
            let healthy =
                entry.protocol.lock().await.transport_state() == TransportState::Connected;
            out.insert(entry.config.name.clone(), healthy);
        }
        out
    }
}

/// A handle to an acquired pool entry. Must be passed back to
/// [`ProcessSupervisor::release_connection`] to free it for reuse.
pub struct PooledConnection {
    server_name: String,
    index: usize,
    pub protocol: Arc<Protocol>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starting_an_unreachable_command_fails_without_storing_a_server() {
        let supervisor = ProcessSupervisor::new();
        let config = ServerConfig::new(
            "broken",
            SpawnConfig::new("sigil-mcp-definitely-not-a-real-binary"),
        );
        let result = supervisor.start(config).await;
        assert!(result.is_err());
        assert!(supervisor.get("broken").await.is_none());
    }

    #[tokio::test]
    async fn stopping_an_unknown_server_fails_with_not_found() {
        let supervisor = ProcessSupervisor::new();
        let result = supervisor.stop("nope").await;
        assert!(matches!(result, Err(McpError::NotFound(_))));
    }

    #[tokio::test]
    async fn pooled_connection_on_unknown_server_fails() {
        let supervisor = ProcessSupervisor::new();
        let result = supervisor.get_pooled_connection("nope").await;
        assert!(matches!(result, Err(McpError::NotFound(_))));
    }
}
