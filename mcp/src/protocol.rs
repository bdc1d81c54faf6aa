//! Protocol: JSON-RPC 2.0 correlation, handshake, capability gating, and domain helpers atop
//! a [`Transport`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;

use crate::error::McpError;
use crate::transport::Transport;
use crate::wire::{self, JsonRpcError, JsonRpcMessage};

/// Default per-request protocol deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub tools: bool,
    #[serde(default)]
    pub resources: bool,
    #[serde(default)]
    pub experimental: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ClientInfo,
    pub capabilities: ServerCapabilities,
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, JsonRpcError>>>>>;

/// A JSON-RPC session atop one [`Transport`]. Owns a background read loop that demultiplexes
/// responses to their waiters and forwards notifications/server-initiated requests to a
/// notification channel.
pub struct Protocol {
    transport: Arc<dyn Transport>,
    next_id: AtomicI64,
    pending: PendingMap,
    initialized: AtomicBool,
    server_capabilities: Mutex<Option<ServerCapabilities>>,
    notifications_tx: mpsc::UnboundedSender<JsonRpcMessage>,
    notifications_rx: Mutex<Option<mpsc::UnboundedReceiver<JsonRpcMessage>>>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Protocol {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
        let protocol = Arc::new(Self {
            transport: transport.clone(),
            next_id: AtomicI64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            initialized: AtomicBool::new(false),
            server_capabilities: Mutex::new(None),
            notifications_tx,
            notifications_rx: Mutex::new(Some(notifications_rx)),
            reader_task: Mutex::new(None),
        });
        protocol.spawn_reader();
        protocol
    }

    fn spawn_reader(self: &Arc<Self>) {
        let transport = self.transport.clone();
        let pending = self.pending.clone();
        let notifications_tx = self.notifications_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match transport.receive().await {
                    Ok(msg) if msg.is_response() => {
                        if let Some(id) = msg.id {
                            let mut guard = pending.lock().await;
                            if let Some(tx) = guard.remove(&id) {
                                let outcome = match msg.error {
                                    Some(err) => Err(err),
                                    None => Ok(msg.result.unwrap_or(Value::Null)),
                                };
                                let _ = tx.send(outcome);
                            }
                        }
                    }
                    Ok(msg) => {
                        // request or notification from the server
                        let _ = notifications_tx.send(msg);
                    }
                    Err(_) => break, // disconnected or parse failure; stop the read loop
                }
            }
        });
        // store, replacing any previous handle (there should be none)
        if let Ok(mut guard) = self.reader_task.try_lock() {
            *guard = Some(task);
        }
    }

    /// Take the notification receiver. May only be called once; subsequent calls return `None`.
    pub async fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        self.notifications_rx.lock().await.take()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let msg = JsonRpcMessage::request(id, method, params);
        if let Err(e) = self.transport.send(&msg).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(_)) => Err(McpError::NotConnected), // sender dropped: read loop died
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout)
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.transport
            .send(&JsonRpcMessage::notification(method, params))
            .await
    }

    /// `initialize` must be the first request. Until it (and the following `initialized`
    /// notification) completes, all domain requests fail with "protocol not initialized".
    pub async fn initialize(&self, client_info: ClientInfo) -> Result<InitializeResult, McpError> {
        let params = serde_json::json!({
            "protocolVersion": wire::PROTOCOL_VERSION,
            "clientInfo": client_info,
        });
        let value = self
            .send_request("initialize", Some(params), DEFAULT_REQUEST_TIMEOUT)
            .await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| McpError::Parse(format!("invalid initialize result: {}", e)))?;
        *self.server_capabilities.lock().await = Some(result.capabilities.clone());
        self.notify("initialized", None).await?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The underlying transport's connectedness, used by the supervisor's health monitor.
    pub fn transport_state(&self) -> crate::transport::TransportState {
        self.transport.state()
    }

    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities.lock().await.clone()
    }

    fn require_initialized(&self) -> Result<(), McpError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }

    async fn require_capability(&self, domain: &'static str) -> Result<(), McpError> {
        self.require_initialized()?;
        let caps = self.server_capabilities.lock().await;
        let ok = match (domain, caps.as_ref()) {
            ("tools", Some(c)) => c.tools,
            ("resources", Some(c)) => c.resources,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(McpError::CapabilityMissing(domain))
        }
    }

    /// Generic request wrapper honoring a caller-supplied deadline; used by domain helpers that
    /// need a non-default timeout (e.g. per-review deadlines upstream).
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, McpError> {
        self.require_initialized()?;
        self.send_request(method, params, deadline).await
    }

    pub async fn complete(&self, params: Value) -> Result<Value, McpError> {
        self.require_initialized()?;
        self.send_request("completion/complete", Some(params), DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn list_tools(&self) -> Result<Value, McpError> {
        self.require_capability("tools").await?;
        self.send_request("tools/list", None, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.require_capability("tools").await?;
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.send_request("tools/call", Some(params), DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn list_resources(&self) -> Result<Value, McpError> {
        self.require_capability("resources").await?;
        self.send_request("resources/list", None, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.require_capability("resources").await?;
        let params = serde_json::json!({ "uri": uri });
        self.send_request("resources/read", Some(params), DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn subscribe_to_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.require_capability("resources").await?;
        let params = serde_json::json!({ "uri": uri });
        self.send_request(
            "resources/subscribe",
            Some(params),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn unsubscribe_from_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.require_capability("resources").await?;
        let params = serde_json::json!({ "uri": uri });
        self.send_request(
            "resources/unsubscribe",
            Some(params),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn list_prompts(&self) -> Result<Value, McpError> {
        self.require_initialized()?;
        self.send_request("prompts/list", None, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.require_initialized()?;
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.send_request("prompts/get", Some(params), DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn ping(&self) -> Result<Value, McpError> {
        self.send_request("ping", None, Duration::from_secs(5))
            .await
    }

    /// Cancel an outstanding request by sending `notifications/cancelled`, and complete its
    /// local waiter (if still pending) with a timeout-classified error.
    pub async fn cancel(&self, id: i64) -> Result<(), McpError> {
        if let Some(tx) = self.pending.lock().await.remove(&id) {
            let _ = tx.send(Err(JsonRpcError::new(
                wire::ERR_TRANSPORT,
                "request cancelled",
            )));
        }
        self.notify(
            "notifications/cancelled",
            Some(serde_json::json!({ "requestId": id })),
        )
        .await
    }

    /// `shutdown` then `exit`, close the transport, mark not initialized. Idempotent.
    pub async fn shutdown(&self) -> Result<(), McpError> {
        if self.initialized.swap(false, Ordering::SeqCst) {
            let _ = self
                .send_request("shutdown", None, Duration::from_secs(5))
                .await;
            let _ = self.notify("exit", None).await;
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    /// An in-memory [`Transport`] pairing with a "fake server" task driven from the test, so
    /// `Protocol`'s correlation/handshake/capability logic can be exercised without spawning a
    /// real subprocess.
    struct MockTransport {
        outgoing: UnboundedSender<JsonRpcMessage>,
        incoming: Mutex<UnboundedReceiver<JsonRpcMessage>>,
        connected: StdAtomicBool,
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send(&self, message: &JsonRpcMessage) -> Result<(), McpError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(McpError::NotConnected);
            }
            self.outgoing
                .send(message.clone())
                .map_err(|_| McpError::NotConnected)
        }

        async fn receive(&self) -> Result<JsonRpcMessage, McpError> {
            let mut rx = self.incoming.lock().await;
            match rx.recv().await {
                Some(msg) => Ok(msg),
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    Err(McpError::NotConnected)
                }
            }
        }

        async fn close(&self) -> Result<(), McpError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn state(&self) -> crate::transport::TransportState {
            if self.connected.load(Ordering::SeqCst) {
                crate::transport::TransportState::Connected
            } else {
                crate::transport::TransportState::Disconnected
            }
        }
    }

    /// Returns a `Protocol` wired to a fake server task. The task answers `initialize` with
    /// `capabilities`, echoes `ping`, and answers `completion/complete`/`tools/list` with an
    /// empty object — enough for the tests below, which only probe correlation/handshake/gating.
    fn protocol_with_fake_server(capabilities: ServerCapabilities) -> Arc<Protocol> {
        let (client_tx, mut server_rx) = unbounded_channel::<JsonRpcMessage>();
        let (server_tx, client_rx) = unbounded_channel::<JsonRpcMessage>();

        tokio::spawn(async move {
            while let Some(msg) = server_rx.recv().await {
                let Some(id) = msg.id else { continue };
                let result = match msg.method.as_deref() {
                    Some("initialize") => serde_json::json!({
                        "protocolVersion": wire::PROTOCOL_VERSION,
                        "serverInfo": {"name": "fake", "version": "0"},
                        "capabilities": capabilities,
                    }),
                    Some("ping") => serde_json::json!({}),
                    _ => serde_json::json!({ "content": "ok", "tokens_used": 1 }),
                };
                let response = JsonRpcMessage {
                    jsonrpc: "2.0".to_string(),
                    id: Some(id),
                    method: None,
                    params: None,
                    result: Some(result),
                    error: None,
                };
                if server_tx.send(response).is_err() {
                    break;
                }
            }
        });

        let transport: Arc<dyn Transport> = Arc::new(MockTransport {
            outgoing: client_tx,
            incoming: Mutex::new(client_rx),
            connected: StdAtomicBool::new(true),
        });
        Protocol::new(transport)
    }

    fn client_info() -> ClientInfo {
        ClientInfo {
            name: "sigil-test".to_string(),
            version: "0".to_string(),
        }
    }

    #[tokio::test]
    async fn domain_calls_fail_before_initialize() {
        let protocol = protocol_with_fake_server(ServerCapabilities::default());
        assert!(matches!(
            protocol.list_tools().await,
            Err(McpError::NotInitialized)
        ));
        assert!(matches!(
            protocol.complete(serde_json::json!({})).await,
            Err(McpError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn successful_handshake_sets_initialized_and_capabilities() {
        let protocol = protocol_with_fake_server(ServerCapabilities {
            tools: true,
            resources: false,
            streaming: true,
            experimental: Default::default(),
        });
        let result = protocol.initialize(client_info()).await.unwrap();
        assert_eq!(result.protocol_version, wire::PROTOCOL_VERSION);
        assert!(protocol.is_initialized());
        let caps = protocol.server_capabilities().await.unwrap();
        assert!(caps.tools);
        assert!(!caps.resources);
    }

    #[tokio::test]
    async fn call_tool_fails_without_tools_capability() {
        let protocol = protocol_with_fake_server(ServerCapabilities::default());
        protocol.initialize(client_info()).await.unwrap();
        let result = protocol.call_tool("anything", serde_json::json!({})).await;
        assert!(matches!(result, Err(McpError::CapabilityMissing("tools"))));
    }

    #[tokio::test]
    async fn call_tool_succeeds_with_tools_capability() {
        let protocol = protocol_with_fake_server(ServerCapabilities {
            tools: true,
            ..Default::default()
        });
        protocol.initialize(client_info()).await.unwrap();
        let result = protocol.call_tool("anything", serde_json::json!({})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn request_ids_are_strictly_monotone() {
        let protocol = protocol_with_fake_server(ServerCapabilities::default());
        protocol.initialize(client_info()).await.unwrap();
        let first_id = protocol.next_id();
        let second_id = protocol.next_id();
        assert!(second_id > first_id);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let protocol = protocol_with_fake_server(ServerCapabilities::default());
        protocol.initialize(client_info()).await.unwrap();
        protocol.shutdown().await.unwrap();
        assert!(!protocol.is_initialized());
        protocol.shutdown().await.unwrap();
    }
}
