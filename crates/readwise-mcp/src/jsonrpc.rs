use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JSONRPC_VERSION;

/// Fixed JSON-RPC error codes used on the wire.
pub mod error_codes {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// No credential was presented while the auth gate is enabled.
    pub const UNAUTHORIZED: i64 = -32001;
    /// A credential was presented but does not match the configured secret.
    pub const FORBIDDEN: i64 = -32003;
}

/// Request identifier. Opaque to the server: it is only ever echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(serde_json::Number),
    String(String),
    #[default]
    Null,
}

impl JsonRpcId {
    /// Lift an arbitrary JSON value into an id. Anything that is not a string or
    /// a number cannot be echoed meaningfully and becomes `null`.
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            _ => Self::Null,
        }
    }
}

impl From<i64> for JsonRpcId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for JsonRpcId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// A validated inbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: JsonRpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<JsonRpcId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Exactly one of `result` or `error`, flattened into the response object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(JsonRpcError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    pub fn ok(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn err(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    fn coded(id: JsonRpcId, code: i64, message: &str, data: Option<String>) -> Self {
        Self::err(
            id,
            JsonRpcError {
                code,
                message: message.to_string(),
                data: data.map(Value::String),
            },
        )
    }

    pub fn invalid_request(id: JsonRpcId, detail: Option<String>) -> Self {
        Self::coded(id, error_codes::INVALID_REQUEST, "Invalid Request", detail)
    }

    pub fn method_not_found(id: JsonRpcId, method: &str) -> Self {
        Self::coded(
            id,
            error_codes::METHOD_NOT_FOUND,
            "Method not found",
            Some(method.to_string()),
        )
    }

    pub fn invalid_params(id: JsonRpcId, detail: impl Into<String>) -> Self {
        Self::coded(
            id,
            error_codes::INVALID_PARAMS,
            "Invalid params",
            Some(detail.into()),
        )
    }

    pub fn internal_error(id: JsonRpcId, detail: impl Into<String>) -> Self {
        Self::coded(
            id,
            error_codes::INTERNAL_ERROR,
            "Internal error",
            Some(detail.into()),
        )
    }

    /// Auth failures happen before the body is read, so the id is always `null`.
    pub fn unauthorized() -> Self {
        Self::coded(
            JsonRpcId::Null,
            error_codes::UNAUTHORIZED,
            "Unauthorized: missing API key",
            None,
        )
    }

    pub fn forbidden() -> Self {
        Self::coded(
            JsonRpcId::Null,
            error_codes::FORBIDDEN,
            "Forbidden: invalid API key",
            None,
        )
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Result(v) => Some(v),
            ResponsePayload::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            ResponsePayload::Result(_) => None,
            ResponsePayload::Error(e) => Some(e),
        }
    }
}

/// Check that a raw payload is a JSON-RPC 2.0 envelope.
///
/// Only the `jsonrpc` marker decides acceptance. A missing or non-string
/// `method` is not a shape error here; it falls through to routing and comes
/// back as "method not found".
///
/// On rejection the returned response already carries `-32600` and the inbound
/// id (or `null` if none could be read).
///
/// Ids are echoed only when they are a string or a number. A boolean, array or
/// object id is not a valid JSON-RPC id and comes back as `null`, on success and
/// on rejection alike.
pub fn validate_envelope(raw: Value) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let Value::Object(mut obj) = raw else {
        return Err(JsonRpcResponse::invalid_request(
            JsonRpcId::Null,
            Some("request must be a JSON object".to_string()),
        ));
    };

    let id = obj
        .get("id")
        .map(JsonRpcId::from_value)
        .unwrap_or_default();

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(_) => {
            return Err(JsonRpcResponse::invalid_request(
                id,
                Some("jsonrpc must be \"2.0\"".to_string()),
            ));
        }
        None => {
            return Err(JsonRpcResponse::invalid_request(
                id,
                Some("missing jsonrpc field".to_string()),
            ));
        }
    }

    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        method,
        params: obj.remove("params"),
    })
}
