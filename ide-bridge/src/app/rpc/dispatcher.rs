use super::model::{JsonRpcRequest, JsonRpcResponse, RpcError};
use crate::app::diff::{DiffReviewService, OpenDiffOutcome, OpenDiffRequest};
use crate::app::editor::EditorHandle;
use crate::domain::session::SessionId;
use crate::telemetry::BridgeMetrics;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const DEFAULT_EXPLANATION: &str = "Proposed changes to this file.";

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Optional prefix clients may put before tool names, as in `ide:openDiff`.
    pub tool_namespace: String,
    pub server_name: String,
    pub server_version: String,
    /// Delay before the forced context push that follows `tools/list`.
    pub client_ready_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tool_namespace: "ide".to_string(),
            server_name: "ide-bridge".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            client_ready_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDiffArgs {
    pub file_path: String,
    pub new_content: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseDiffArgs {
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateToArgs {
    pub file_path: String,
    pub line: u32,
    #[serde(default)]
    pub character: Option<u32>,
}

/// Every tool the bridge serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeTool {
    OpenDiff(OpenDiffArgs),
    CloseDiff(CloseDiffArgs),
    NavigateTo(NavigateToArgs),
}

impl BridgeTool {
    pub fn parse(name: &str, arguments: Value, namespace: &str) -> Result<Self, RpcError> {
        let base = name
            .strip_prefix(namespace)
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|_| !namespace.is_empty())
            .unwrap_or(name);
        let invalid = |err: serde_json::Error| RpcError::InvalidParams(format!("{name}: {err}"));
        match base {
            "openDiff" => serde_json::from_value(arguments)
                .map(BridgeTool::OpenDiff)
                .map_err(invalid),
            "closeDiff" => serde_json::from_value(arguments)
                .map(BridgeTool::CloseDiff)
                .map_err(invalid),
            "navigateTo" => serde_json::from_value(arguments)
                .map(BridgeTool::NavigateTo)
                .map_err(invalid),
            _ => Err(RpcError::MethodNotFound(name.to_string())),
        }
    }

    pub fn descriptors() -> Value {
        json!([
            {
                "name": "openDiff",
                "description": "Open a diff view for a file",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "filePath": {"type": "string"},
                        "newContent": {"type": "string"},
                        "explanation": {"type": "string"},
                        "blocking": {"type": "boolean"}
                    },
                    "required": ["filePath", "newContent"]
                }
            },
            {
                "name": "closeDiff",
                "description": "Close a diff view",
                "inputSchema": {
                    "type": "object",
                    "properties": {"filePath": {"type": "string"}},
                    "required": ["filePath"]
                }
            },
            {
                "name": "navigateTo",
                "description": "Open a file and scroll to a specific line/character",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "filePath": {"type": "string"},
                        "line": {"type": "integer"},
                        "character": {"type": "integer"}
                    },
                    "required": ["filePath", "line"]
                }
            }
        ])
    }
}

/// Routes JSON-RPC requests to bridge services. Holds no per-request state.
pub struct RpcDispatcher {
    diffs: Arc<DiffReviewService>,
    editor: EditorHandle,
    config: DispatcherConfig,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl RpcDispatcher {
    pub fn new(
        diffs: Arc<DiffReviewService>,
        editor: EditorHandle,
        config: DispatcherConfig,
        metrics: Option<Arc<BridgeMetrics>>,
    ) -> Self {
        Self {
            diffs,
            editor,
            config,
            metrics,
        }
    }

    /// Dispatch a raw payload; anything that is not a request object is a protocol error.
    pub async fn dispatch_value(
        &self,
        payload: Value,
        session_id: Option<SessionId>,
    ) -> Option<JsonRpcResponse> {
        let id = payload.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(payload) {
            Ok(request) => self.dispatch(request, session_id).await,
            Err(err) => {
                debug!(%err, "malformed JSON-RPC payload");
                self.record("invalid", "not_found");
                let error = RpcError::MethodNotFound(format!("malformed request ({err})"));
                Some(JsonRpcResponse::failure(id, error.to_json()))
            }
        }
    }

    /// Returns `None` for notifications.
    pub async fn dispatch(
        &self,
        request: JsonRpcRequest,
        session_id: Option<SessionId>,
    ) -> Option<JsonRpcResponse> {
        let method = request.method.clone();
        let notification = request.is_notification();
        let id = request.id.clone().unwrap_or(Value::Null);
        let outcome = AssertUnwindSafe(self.route(request, session_id))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!(%method, %message, "JSON-RPC handler panicked");
                Err(RpcError::Internal(message))
            });
        match &outcome {
            Ok(_) => self.record(&method, "ok"),
            Err(err) => {
                debug!(%method, %err, "JSON-RPC request failed");
                self.record(&method, err.outcome_label());
            }
        }
        if notification {
            return None;
        }
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(id, err.to_json()),
        })
    }

    async fn route(
        &self,
        request: JsonRpcRequest,
        session_id: Option<SessionId>,
    ) -> Result<Value, RpcError> {
        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": self.config.server_name,
                    "version": self.config.server_version,
                },
                "capabilities": { "tools": {} },
            })),
            "tools/list" => {
                self.schedule_client_ready();
                Ok(json!({ "tools": BridgeTool::descriptors() }))
            }
            "tools/call" => {
                let params: ToolCallParams =
                    serde_json::from_value(request.params.unwrap_or(Value::Null))
                        .map_err(|err| RpcError::InvalidParams(err.to_string()))?;
                let tool = BridgeTool::parse(
                    &params.name,
                    params.arguments,
                    &self.config.tool_namespace,
                )?;
                self.call_tool(tool, session_id).await
            }
            "ping" => Ok(json!({})),
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    async fn call_tool(
        &self,
        tool: BridgeTool,
        session_id: Option<SessionId>,
    ) -> Result<Value, RpcError> {
        match tool {
            BridgeTool::OpenDiff(args) => {
                let request = OpenDiffRequest {
                    file_path: args.file_path,
                    new_content: args.new_content,
                    explanation: args
                        .explanation
                        .unwrap_or_else(|| DEFAULT_EXPLANATION.to_string()),
                    blocking: args.blocking,
                    session_id,
                };
                match self.diffs.open_diff(request, &self.editor).await? {
                    OpenDiffOutcome::Opened => Ok(text_result("Diff view opened")),
                    OpenDiffOutcome::Resolved(resolution) => {
                        let structured = resolution.to_value();
                        Ok(json!({
                            "content": [{ "type": "text", "text": structured.to_string() }],
                            "structuredContent": structured,
                        }))
                    }
                }
            }
            BridgeTool::CloseDiff(args) => {
                if !self.editor.request_resolve(args.file_path, false).await {
                    return Err(RpcError::Internal("editor loop is not running".into()));
                }
                Ok(text_result("Diff closed"))
            }
            BridgeTool::NavigateTo(args) => {
                let character = args.character.unwrap_or(1);
                if !self
                    .editor
                    .navigate_to(args.file_path.clone(), args.line, character)
                    .await
                {
                    return Err(RpcError::Internal("editor loop is not running".into()));
                }
                Ok(text_result(&format!("Navigated to {}", args.file_path)))
            }
        }
    }

    /// `tools/list` means the client is ready for context; push it unconditionally shortly after.
    fn schedule_client_ready(&self) {
        let editor = self.editor.clone();
        let delay = self.config.client_ready_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            editor.publish_context(true).await;
        });
    }

    fn record(&self, method: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rpc(method, outcome);
        }
    }
}

fn text_result(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::editor::EditorCommand;
    use crate::app::session::SessionRegistry;
    use tokio::sync::mpsc;

    struct Fixture {
        dispatcher: RpcDispatcher,
        commands: mpsc::Receiver<EditorCommand>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SessionRegistry::new(8, None));
        let diffs = Arc::new(DiffReviewService::new(
            registry,
            Duration::from_secs(5),
            None,
        ));
        let (editor, commands) = EditorHandle::channel(16);
        let config = DispatcherConfig {
            client_ready_delay: Duration::from_millis(10),
            ..DispatcherConfig::default()
        };
        Fixture {
            dispatcher: RpcDispatcher::new(diffs, editor, config, None),
            commands,
        }
    }

    async fn call(dispatcher: &RpcDispatcher, payload: Value) -> Value {
        dispatcher
            .dispatch_value(payload, None)
            .await
            .expect("response")
            .to_value()
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server() {
        let f = fixture();
        let response = call(
            &f.dispatcher,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        )
        .await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(response["result"]["serverInfo"]["name"], "ide-bridge");
        assert_eq!(response["result"]["capabilities"], json!({"tools": {}}));
    }

    #[tokio::test]
    async fn tools_list_triggers_forced_context_push() {
        let mut f = fixture();
        let response = call(
            &f.dispatcher,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        )
        .await;
        let names: Vec<_> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["openDiff", "closeDiff", "navigateTo"]);
        assert!(matches!(
            f.commands.recv().await,
            Some(EditorCommand::PublishContext { force: true })
        ));
    }

    #[tokio::test]
    async fn unknown_method_and_tool_are_not_found() {
        let f = fixture();
        let response = call(&f.dispatcher, json!({"jsonrpc": "2.0", "id": 3, "method": "bogus"})).await;
        assert_eq!(response["error"]["code"], -32601);

        let response = call(
            &f.dispatcher,
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": {"name": "rm", "arguments": {}}}),
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["error"]["message"], "Method not found: rm");
    }

    #[tokio::test]
    async fn malformed_payloads_are_protocol_errors() {
        let f = fixture();
        let response = call(&f.dispatcher, json!({"id": 5, "params": []})).await;
        assert_eq!(response["id"], 5);
        assert_eq!(response["error"]["code"], -32601);

        let response = call(
            &f.dispatcher,
            json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call", "params": {"name": "openDiff", "arguments": {"filePath": 7}}}),
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let f = fixture();
        let request: JsonRpcRequest = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(f.dispatcher.dispatch(request, None).await.is_none());
    }

    #[tokio::test]
    async fn null_id_still_gets_a_response() {
        let f = fixture();
        let response = f
            .dispatcher
            .dispatch_value(json!({"jsonrpc": "2.0", "id": null, "method": "ping"}), None)
            .await
            .expect("response for explicit null id")
            .to_value();
        assert_eq!(response, json!({"jsonrpc": "2.0", "id": null, "result": {}}));
    }

    #[tokio::test]
    async fn namespaced_tools_reach_the_editor() {
        let mut f = fixture();
        let response = call(
            &f.dispatcher,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call", "params": {
                "name": "ide:navigateTo",
                "arguments": {"filePath": "/w/a.rs", "line": 12}
            }}),
        )
        .await;
        assert_eq!(response["result"]["content"][0]["text"], "Navigated to /w/a.rs");
        assert!(matches!(
            f.commands.recv().await,
            Some(EditorCommand::NavigateTo { line: 12, character: 1, .. })
        ));

        let response = call(
            &f.dispatcher,
            json!({"jsonrpc": "2.0", "id": 8, "method": "tools/call", "params": {
                "name": "closeDiff",
                "arguments": {"filePath": "/w/a.rs"}
            }}),
        )
        .await;
        assert_eq!(response["result"]["content"][0]["text"], "Diff closed");
        assert!(matches!(
            f.commands.recv().await,
            Some(EditorCommand::ResolveDiff { accepted: false, reply: None, .. })
        ));
    }

    #[tokio::test]
    async fn non_blocking_open_diff_and_conflict() {
        let f = fixture();
        let open = json!({"jsonrpc": "2.0", "id": 9, "method": "tools/call", "params": {
            "name": "openDiff",
            "arguments": {"filePath": "/w/a.py", "newContent": "print(2)"}
        }});
        let response = call(&f.dispatcher, open.clone()).await;
        assert_eq!(response["result"]["content"][0]["text"], "Diff view opened");
        let response = call(&f.dispatcher, open).await;
        assert_eq!(response["error"]["code"], -32001);
    }

    #[test]
    fn foreign_namespaces_are_not_stripped() {
        assert!(matches!(
            BridgeTool::parse("other:openDiff", json!({}), "ide"),
            Err(RpcError::MethodNotFound(_))
        ));
        assert!(matches!(
            BridgeTool::parse("closeDiff", json!({"filePath": "/a"}), ""),
            Ok(BridgeTool::CloseDiff(_))
        ));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked");
    }
}
