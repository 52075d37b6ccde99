// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    parse_message, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, McpError, McpPrompt,
    McpPromptMessage, McpResource, McpResourceTemplate, McpServerInfo, McpTool, McpTransport,
    PROTOCOL_VERSION,
};

type Waiter = oneshot::Sender<Result<Value, McpError>>;
type DisconnectCallback = Box<dyn Fn(Option<McpError>) + Send + Sync>;

/// Client for one MCP server connection.
///
/// Request ids are monotonic integers; a single receive task per connection
/// routes responses to waiters through the pending map.  On disconnect all
/// outstanding waiters complete with [`McpError::Disconnected`].
pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    client_name: String,
    client_version: String,
    request_timeout: Duration,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, Waiter>>>,
    server_info: Mutex<Option<McpServerInfo>>,
    receive_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    on_disconnect: Option<Arc<DisconnectCallback>>,
}

impl McpClient {
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            transport,
            client_name: "forge".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
            request_timeout: Duration::from_secs(30),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            server_info: Mutex::new(None),
            receive_task: Mutex::new(None),
            on_disconnect: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Callback invoked with the underlying cause when the connection is
    /// lost unexpectedly.
    pub fn with_on_disconnect(
        mut self,
        callback: impl Fn(Option<McpError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Arc::new(Box::new(callback)));
        self
    }

    pub fn server_info(&self) -> Option<McpServerInfo> {
        self.server_info.lock().expect("server info poisoned").clone()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected() && self.server_info().is_some()
    }

    /// Open the transport, start the receive task, and run the
    /// `initialize` handshake.
    pub async fn connect(&self) -> Result<McpServerInfo, McpError> {
        self.transport.connect().await?;
        self.start_receive_task();

        let handshake = async {
            let result = self
                .request(
                    "initialize",
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "clientInfo": {
                            "name": self.client_name,
                            "version": self.client_version,
                        },
                        "capabilities": {},
                    }),
                )
                .await?;

            let info = McpServerInfo::from_initialize_result(&result);
            self.notify("notifications/initialized", json!({})).await?;
            Ok::<_, McpError>(info)
        };

        match handshake.await {
            Ok(info) => {
                info!(server = %info.name, version = %info.version, "connected to MCP server");
                *self.server_info.lock().expect("server info poisoned") = Some(info.clone());
                Ok(info)
            }
            Err(e) => {
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Cancel the receive task, fail all pending waiters, close the
    /// transport.
    pub async fn disconnect(&self) {
        if let Some(task) = self.receive_task.lock().expect("receive task poisoned").take() {
            task.abort();
        }
        fail_all_pending(&self.pending, McpError::Disconnected);
        if let Err(e) = self.transport.disconnect().await {
            warn!("error during disconnect: {e}");
        }
        *self.server_info.lock().expect("server info poisoned") = None;
        info!("disconnected from MCP server");
    }

    fn capabilities(&self) -> crate::McpCapabilities {
        self.server_info().map(|i| i.capabilities).unwrap_or_default()
    }

    // ── Operations ────────────────────────────────────────────────────────────

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        if !self.capabilities().tools {
            return Ok(Vec::new());
        }
        let result = self.request("tools/list", json!({})).await?;
        Ok(deserialize_list(&result["tools"]))
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<Value>, McpError> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        Ok(result["content"].as_array().cloned().unwrap_or_default())
    }

    pub async fn list_resources(&self) -> Result<Vec<McpResource>, McpError> {
        if !self.capabilities().resources {
            return Ok(Vec::new());
        }
        let result = self.request("resources/list", json!({})).await?;
        Ok(deserialize_list(&result["resources"]))
    }

    pub async fn list_resource_templates(&self) -> Result<Vec<McpResourceTemplate>, McpError> {
        if !self.capabilities().resources {
            return Ok(Vec::new());
        }
        let result = self.request("resources/templates/list", json!({})).await?;
        Ok(deserialize_list(&result["resourceTemplates"]))
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>, McpError> {
        let result = self.request("resources/read", json!({"uri": uri})).await?;
        Ok(result["contents"].as_array().cloned().unwrap_or_default())
    }

    pub async fn list_prompts(&self) -> Result<Vec<McpPrompt>, McpError> {
        if !self.capabilities().prompts {
            return Ok(Vec::new());
        }
        let result = self.request("prompts/list", json!({})).await?;
        Ok(deserialize_list(&result["prompts"]))
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Vec<McpPromptMessage>, McpError> {
        let result = self
            .request("prompts/get", json!({"name": name, "arguments": arguments}))
            .await?;
        Ok(deserialize_list(&result["messages"]))
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending map poisoned").insert(id, tx);

        let frame = JsonRpcRequest { id, method: method.to_string(), params }.to_value();
        if let Err(e) = self.transport.send(&frame).await {
            self.pending.lock().expect("pending map poisoned").remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::Disconnected),
            Err(_) => {
                self.pending.lock().expect("pending map poisoned").remove(&id);
                Err(McpError::Timeout(format!("request timeout: {method}")))
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let frame = JsonRpcNotification { method: method.to_string(), params }.to_value();
        self.transport.send(&frame).await
    }

    fn start_receive_task(&self) {
        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        let on_disconnect = self.on_disconnect.clone();

        let task = tokio::spawn(async move {
            let cause = loop {
                match transport.receive().await {
                    Ok(message) => handle_message(&pending, message),
                    Err(McpError::Protocol(e)) => {
                        warn!("receive error: {e}");
                        break Some(McpError::Protocol(e));
                    }
                    Err(e) => break Some(e),
                }
            };
            fail_all_pending(&pending, McpError::Disconnected);
            if let Some(callback) = on_disconnect {
                callback(cause);
            }
        });
        *self.receive_task.lock().expect("receive task poisoned") = Some(task);
    }
}

fn handle_message(pending: &Mutex<HashMap<u64, Waiter>>, message: Value) {
    let message = match parse_message(message) {
        Ok(m) => m,
        Err(e) => {
            warn!("invalid message: {e}");
            return;
        }
    };
    match message {
        JsonRpcMessage::Response(resp) => {
            let Some(id) = resp.id.as_u64() else {
                warn!(id = %resp.id, "response with non-integer id");
                return;
            };
            let Some(waiter) = pending.lock().expect("pending map poisoned").remove(&id) else {
                warn!(id, "unexpected response id");
                return;
            };
            let outcome = match resp.error {
                Some(e) => Err(McpError::Rpc { code: e.code, message: e.message }),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            };
            let _ = waiter.send(outcome);
        }
        JsonRpcMessage::Notification(n) => {
            debug!(method = %n.method, "server notification");
        }
        JsonRpcMessage::Request(r) => {
            debug!(method = %r.method, "server-initiated request (unhandled)");
        }
    }
}

fn fail_all_pending(pending: &Mutex<HashMap<u64, Waiter>>, error: McpError) {
    let waiters: Vec<Waiter> = pending
        .lock()
        .expect("pending map poisoned")
        .drain()
        .map(|(_, w)| w)
        .collect();
    for waiter in waiters {
        let _ = waiter.send(Err(error.clone()));
    }
}

fn deserialize_list<T: serde::de::DeserializeOwned>(value: &Value) -> Vec<T> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;

    /// Scripted transport: every sent request gets the queued reply for its
    /// method (by arrival order), echoing the request id.
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Value>>,
        inbound: Mutex<VecDeque<Value>>,
        notify: Notify,
        connected: AtomicBool,
        sent: Mutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Value>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                inbound: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                connected: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn initialize_reply() -> Value {
            json!({
                "serverInfo": {"name": "scripted", "version": "1.0"},
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}, "resources": {}, "prompts": {}}
            })
        }
    }

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), McpError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, message: &Value) -> Result<(), McpError> {
            self.sent.lock().unwrap().push(message.clone());
            // Notifications have no id and get no reply.
            let Some(id) = message.get("id").and_then(|v| v.as_u64()) else {
                return Ok(());
            };
            let reply_body = self.replies.lock().unwrap().pop_front();
            if let Some(body) = reply_body {
                let mut frame = json!({"jsonrpc": "2.0", "id": id});
                if let Some(err) = body.get("__error__") {
                    frame["error"] = err.clone();
                } else {
                    frame["result"] = body;
                }
                self.inbound.lock().unwrap().push_back(frame);
                self.notify.notify_one();
            }
            Ok(())
        }

        async fn receive(&self) -> Result<Value, McpError> {
            loop {
                if let Some(v) = self.inbound.lock().unwrap().pop_front() {
                    return Ok(v);
                }
                if !self.is_connected() {
                    return Err(McpError::Disconnected);
                }
                self.notify.notified().await;
            }
        }

        async fn disconnect(&self) -> Result<(), McpError> {
            self.connected.store(false, Ordering::SeqCst);
            self.notify.notify_waiters();
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn connect_runs_initialize_handshake() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::initialize_reply(),
        ]));
        let client = McpClient::new(Arc::clone(&transport) as Arc<dyn McpTransport>);

        let info = client.connect().await.unwrap();
        assert_eq!(info.name, "scripted");
        assert!(info.capabilities.tools);

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent[0]["method"], "initialize");
        assert_eq!(sent[0]["params"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(sent[1]["method"], "notifications/initialized");
        assert!(sent[1].get("id").is_none());
        client.disconnect().await;
    }

    #[tokio::test]
    async fn list_tools_parses_reply() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::initialize_reply(),
            json!({"tools": [{"name": "search", "description": "d", "inputSchema": {}}]}),
        ]));
        let client = McpClient::new(transport as Arc<dyn McpTransport>);
        client.connect().await.unwrap();

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search");
        client.disconnect().await;
    }

    #[tokio::test]
    async fn missing_capability_short_circuits_to_empty() {
        let transport = Arc::new(ScriptedTransport::new(vec![json!({
            "serverInfo": {"name": "s", "version": "1"},
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {}
        })]));
        let client = McpClient::new(Arc::clone(&transport) as Arc<dyn McpTransport>);
        client.connect().await.unwrap();

        assert!(client.list_tools().await.unwrap().is_empty());
        assert!(client.list_prompts().await.unwrap().is_empty());
        assert!(client.list_resources().await.unwrap().is_empty());
        // Only initialize + initialized ever hit the wire.
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn server_error_becomes_rpc_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::initialize_reply(),
            json!({"__error__": {"code": -32601, "message": "no such tool"}}),
        ]));
        let client = McpClient::new(transport as Arc<dyn McpTransport>);
        client.connect().await.unwrap();

        let err = client.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32601, .. }));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::initialize_reply(),
            // No reply queued for the next request.
        ]));
        let client = McpClient::new(transport as Arc<dyn McpTransport>)
            .with_request_timeout(Duration::from_millis(100));
        client.connect().await.unwrap();

        let err = client.call_tool("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_fails_outstanding_requests() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::initialize_reply(),
        ]));
        let client = Arc::new(
            McpClient::new(Arc::clone(&transport) as Arc<dyn McpTransport>)
                .with_request_timeout(Duration::from_secs(30)),
        );
        client.connect().await.unwrap();

        let pending_client = Arc::clone(&client);
        let pending = tokio::spawn(async move {
            pending_client.call_tool("never-answered", json!({})).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.disconnect().await;
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Disconnected));
    }

    #[tokio::test]
    async fn request_ids_are_monotonic() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::initialize_reply(),
            json!({"content": []}),
            json!({"content": []}),
        ]));
        let client = McpClient::new(Arc::clone(&transport) as Arc<dyn McpTransport>);
        client.connect().await.unwrap();
        client.call_tool("a", json!({})).await.unwrap();
        client.call_tool("b", json!({})).await.unwrap();

        let sent = transport.sent.lock().unwrap().clone();
        let ids: Vec<u64> = sent
            .iter()
            .filter_map(|m| m.get("id").and_then(|v| v.as_u64()))
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        client.disconnect().await;
    }
}
