use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt as _;
use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument as _, debug, warn};

use crate::PROTOCOL_VERSION;
use crate::jsonrpc::{JsonRpcId, JsonRpcRequest, JsonRpcResponse, validate_envelope};
use crate::types::{CallToolParams, InitializeResult, McpServerInfo, ToolDescriptor};

/// The execution contract for tools.
///
/// Implementations own argument validation and any retry policy. Whatever they
/// return is sent to the client unchanged as the `result` of `tools/call`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: Value) -> anyhow::Result<Value>;
}

/// Immutable server description shared by every request.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub server_info: McpServerInfo,
    pub protocol_version: String,
    pub capabilities: Value,
    pub tools: Arc<[ToolDescriptor]>,
}

impl McpServerConfig {
    pub fn new(name: &str, version: &str, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            server_info: McpServerInfo {
                name: name.to_string(),
                version: version.to_string(),
            },
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({ "tools": {} }),
            tools: tools.into(),
        }
    }

    fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: self.protocol_version.clone(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
        }
    }
}

/// The closed set of methods this server answers.
#[derive(Debug, Clone, PartialEq)]
pub enum McpRequest {
    Initialize,
    ListTools,
    CallTool { name: String, arguments: Value },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl McpRequest {
    pub fn parse(method: &str, params: Option<Value>) -> Result<Self, RouteError> {
        match method {
            "initialize" => Ok(Self::Initialize),
            "tools/list" => Ok(Self::ListTools),
            "tools/call" => {
                let params = match params {
                    None | Some(Value::Null) => CallToolParams::default(),
                    Some(v) => serde_json::from_value::<CallToolParams>(v)
                        .map_err(|e| RouteError::InvalidParams(e.to_string()))?,
                };
                let name = params
                    .name
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| RouteError::InvalidParams("missing tool name".to_string()))?;
                let arguments = match params.arguments {
                    None | Some(Value::Null) => Value::Object(Default::default()),
                    Some(v) => v,
                };
                Ok(Self::CallTool { name, arguments })
            }
            other => Err(RouteError::MethodNotFound(other.to_string())),
        }
    }
}

/// Validates, routes and answers JSON-RPC envelopes.
///
/// Cheap to clone; all state is shared and read-only.
#[derive(Clone)]
pub struct McpServer {
    cfg: Arc<McpServerConfig>,
    executor: Arc<dyn ToolExecutor>,
}

impl McpServer {
    pub fn new(cfg: McpServerConfig, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            cfg: Arc::new(cfg),
            executor,
        }
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.cfg
    }

    /// Handle one raw payload: validate the envelope, then route it.
    pub async fn handle(&self, raw: Value) -> JsonRpcResponse {
        match validate_envelope(raw) {
            Ok(req) => self.route(req).await,
            Err(resp) => resp,
        }
    }

    pub async fn route(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest {
            id, method, params, ..
        } = req;

        let request = match McpRequest::parse(&method, params) {
            Ok(r) => r,
            Err(RouteError::MethodNotFound(m)) => {
                debug!(method = %m, "unknown method");
                return JsonRpcResponse::method_not_found(id, &m);
            }
            Err(RouteError::InvalidParams(detail)) => {
                return JsonRpcResponse::invalid_params(id, detail);
            }
        };

        match request {
            McpRequest::Initialize => to_result(id, &self.cfg.initialize_result()),
            McpRequest::ListTools => to_result(
                id,
                &ListToolsResult {
                    tools: &self.cfg.tools,
                },
            ),
            McpRequest::CallTool { name, arguments } => self.invoke(id, name, arguments).await,
        }
    }

    /// The tool invocation bridge. Never lets a collaborator failure escape:
    /// errors and panics alike become `-32603` with the detail as `data`.
    async fn invoke(&self, id: JsonRpcId, name: String, arguments: Value) -> JsonRpcResponse {
        let span = tracing::info_span!("mcp.tools_call", tool = %name);
        let outcome = AssertUnwindSafe(self.executor.execute(&name, arguments))
            .catch_unwind()
            .instrument(span)
            .await;

        let metrics = readwise_otel::metrics();
        match outcome {
            Ok(Ok(result)) => {
                metrics.record_tool_call(&name, "ok");
                JsonRpcResponse::ok(id, result)
            }
            Ok(Err(e)) => {
                let detail = format!("{e:#}");
                warn!(tool = %name, error = %detail, "tool call failed");
                metrics.record_tool_call(&name, "error");
                JsonRpcResponse::internal_error(id, detail)
            }
            Err(panic) => {
                let detail = panic_detail(panic.as_ref());
                warn!(tool = %name, error = %detail, "tool call panicked");
                metrics.record_tool_call(&name, "panic");
                JsonRpcResponse::internal_error(id, detail)
            }
        }
    }
}

#[derive(serde::Serialize)]
struct ListToolsResult<'a> {
    tools: &'a [ToolDescriptor],
}

fn to_result<T: serde::Serialize>(id: JsonRpcId, value: &T) -> JsonRpcResponse {
    match serde_json::to_value(value) {
        Ok(v) => JsonRpcResponse::ok(id, v),
        Err(e) => JsonRpcResponse::internal_error(id, e.to_string()),
    }
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("tool panicked: {s}")
    } else {
        "tool panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::error_codes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolExecutor for StubExecutor {
        async fn execute(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match name {
                "X" => anyhow::bail!("upstream exploded"),
                "boom" => panic!("stub panic"),
                _ => Ok(json!({
                    "content": [{"type": "text", "text": format!("called {name}")}],
                    "echo": arguments,
                    "extra": {"nested": [1, 2, 3]}
                })),
            }
        }
    }

    fn catalog() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "echo".to_string(),
                description: "demo".to_string(),
                input_schema: json!({"type": "object"}),
            },
            ToolDescriptor {
                name: "X".to_string(),
                description: "always fails".to_string(),
                input_schema: json!({"type": "object"}),
            },
        ]
    }

    fn mk_server() -> (McpServer, Arc<StubExecutor>) {
        let stub = Arc::new(StubExecutor::default());
        let cfg = McpServerConfig::new("test-server", "9.9.9", catalog());
        (McpServer::new(cfg, stub.clone()), stub)
    }

    async fn call(server: &McpServer, raw: Value) -> JsonRpcResponse {
        server.handle(raw).await
    }

    #[tokio::test]
    async fn initialize_is_fixed_regardless_of_params() {
        let (server, _) = mk_server();
        let mut seen = Vec::new();
        for params in [
            None,
            Some(json!({})),
            Some(json!({"protocolVersion": "1999-01-01", "capabilities": {"x": true}})),
            Some(json!("garbage")),
        ] {
            let mut raw = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
            if let Some(p) = params {
                raw["params"] = p;
            }
            let resp = call(&server, raw).await;
            seen.push(resp.result().cloned().expect("result"));
        }
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(seen[0]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(
            seen[0]["serverInfo"],
            json!({"name": "test-server", "version": "9.9.9"})
        );
        assert!(seen[0]["capabilities"].get("tools").is_some());
    }

    #[tokio::test]
    async fn tools_list_returns_full_catalog() {
        let (server, stub) = mk_server();
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": "l", "method": "tools/list"}),
        )
        .await;
        let tools = resp.result().expect("result")["tools"]
            .as_array()
            .cloned()
            .expect("array");
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["inputSchema"], json!({"type": "object"}));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_methods_are_not_found() {
        let (server, _) = mk_server();
        for method in ["ping", "tools/List", "resources/list", ""] {
            let resp = call(
                &server,
                json!({"jsonrpc": "2.0", "id": 3, "method": method}),
            )
            .await;
            assert_eq!(
                resp.error().map(|e| e.code),
                Some(error_codes::METHOD_NOT_FOUND),
                "method={method}"
            );
            assert_eq!(resp.id, JsonRpcId::from(3));
        }

        let resp = call(&server, json!({"jsonrpc": "2.0", "id": 4})).await;
        assert_eq!(
            resp.error().map(|e| e.code),
            Some(error_codes::METHOD_NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn missing_tool_name_never_reaches_executor() {
        let (server, stub) = mk_server();
        for params in [
            None,
            Some(json!({})),
            Some(json!({"name": ""})),
            Some(json!({"arguments": {"a": 1}})),
            Some(json!({"name": 42})),
        ] {
            let mut raw = json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call"});
            if let Some(p) = params.clone() {
                raw["params"] = p;
            }
            let resp = call(&server, raw).await;
            assert_eq!(
                resp.error().map(|e| e.code),
                Some(error_codes::INVALID_PARAMS),
                "params={params:?}"
            );
        }
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn call_result_is_passed_through_untouched() {
        let (server, stub) = mk_server();
        let resp = call(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": "c1",
                "method": "tools/call",
                "params": {"name": "echo", "arguments": {"q": "rust"}}
            }),
        )
        .await;
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        let result = resp.result().expect("result");
        assert_eq!(result["echo"], json!({"q": "rust"}));
        assert_eq!(result["extra"], json!({"nested": [1, 2, 3]}));
        assert_eq!(resp.id, JsonRpcId::from("c1"));
    }

    #[tokio::test]
    async fn missing_arguments_default_to_empty_object() {
        let (server, _) = mk_server();
        let resp = call(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "echo"}
            }),
        )
        .await;
        assert_eq!(resp.result().expect("result")["echo"], json!({}));
    }

    #[tokio::test]
    async fn executor_failure_maps_to_internal_error() {
        let (server, stub) = mk_server();
        let resp = call(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 9,
                "method": "tools/call",
                "params": {"name": "X", "arguments": {}}
            }),
        )
        .await;
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        let err = resp.error().expect("error");
        assert_eq!(err.code, error_codes::INTERNAL_ERROR);
        assert_eq!(err.message, "Internal error");
        let data = err.data.as_ref().and_then(Value::as_str).expect("data");
        assert!(data.contains("upstream exploded"), "data={data}");
    }

    #[tokio::test]
    async fn executor_panic_is_contained() {
        let (server, _) = mk_server();
        let resp = call(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 10,
                "method": "tools/call",
                "params": {"name": "boom"}
            }),
        )
        .await;
        let err = resp.error().expect("error");
        assert_eq!(err.code, error_codes::INTERNAL_ERROR);
        let data = err.data.as_ref().and_then(Value::as_str).expect("data");
        assert!(data.contains("stub panic"), "data={data}");

        // The server keeps answering after a panic.
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 11, "method": "tools/list"}),
        )
        .await;
        assert!(resp.result().is_some());
    }

    #[tokio::test]
    async fn invalid_envelope_is_rejected_before_routing() {
        let (server, stub) = mk_server();
        let resp = call(
            &server,
            json!({
                "jsonrpc": "1.0",
                "id": 12,
                "method": "tools/call",
                "params": {"name": "echo"}
            }),
        )
        .await;
        assert_eq!(
            resp.error().map(|e| e.code),
            Some(error_codes::INVALID_REQUEST)
        );
        assert_eq!(resp.id, JsonRpcId::from(12));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn parse_is_exhaustive_over_known_methods() {
        assert_eq!(McpRequest::parse("initialize", None), Ok(McpRequest::Initialize));
        assert_eq!(McpRequest::parse("tools/list", None), Ok(McpRequest::ListTools));
        assert_eq!(
            McpRequest::parse("tools/call", Some(json!({"name": "a", "arguments": null}))),
            Ok(McpRequest::CallTool {
                name: "a".to_string(),
                arguments: json!({})
            })
        );
        assert!(matches!(
            McpRequest::parse("nope", None),
            Err(RouteError::MethodNotFound(_))
        ));
    }
}
