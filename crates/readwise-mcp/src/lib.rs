//! Protocol core for the Readwise MCP server.
//!
//! Everything that has protocol semantics lives here:
//! - JSON-RPC 2.0 envelopes, validation and error codes (`jsonrpc`)
//! - the shared-secret gate in front of every RPC and stream (`auth`)
//! - method routing and the tool invocation bridge (`server`)
//! - the keep-alive event stream handed out on `/sse` (`sse`)
//!
//! Transport wiring (axum, ports, process startup) belongs to the binary. The
//! actual tools are reached through the [`ToolExecutor`] seam.

mod auth;
mod jsonrpc;
mod server;
mod sse;
mod types;

pub use auth::{AuthGate, AuthOutcome, CredentialCandidates};
pub use jsonrpc::{
    JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse, ResponsePayload, error_codes,
    validate_envelope,
};
pub use server::{McpRequest, McpServer, McpServerConfig, RouteError, ToolExecutor};
pub use sse::{DEFAULT_KEEPALIVE, EventStream, StreamEvent, StreamState, StreamTracker};
pub use types::{
    CallToolParams, CallToolResult, ContentBlock, InitializeResult, McpServerInfo, ToolDescriptor,
};

/// Protocol version echoed by `initialize`. There is no negotiation.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Value every envelope must carry in its `jsonrpc` field.
pub const JSONRPC_VERSION: &str = "2.0";

/// Name the server reports in `serverInfo` and on `/health`.
pub const SERVICE_NAME: &str = "readwise-mcp-enhanced";
