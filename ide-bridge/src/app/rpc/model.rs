use crate::app::diff::DiffError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INTERNAL_ERROR: i32 = -32603;
pub const TIMEOUT: i32 = -32000;
pub const DIFF_CONFLICT: i32 = -32001;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// `None` only when the member is absent; an explicit `null` id is `Some(Value::Null)`.
    #[serde(default, deserialize_with = "present_value")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Requests without an id member are notifications and never get a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Conflict(String),
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::MethodNotFound(_) | RpcError::InvalidParams(_) => METHOD_NOT_FOUND,
            RpcError::Internal(_) => INTERNAL_ERROR,
            RpcError::Timeout(_) => TIMEOUT,
            RpcError::Conflict(_) => DIFF_CONFLICT,
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        match self {
            RpcError::MethodNotFound(_) => "not_found",
            RpcError::InvalidParams(_) => "invalid",
            RpcError::Internal(_) => "internal",
            RpcError::Timeout(_) => "timeout",
            RpcError::Conflict(_) => "conflict",
        }
    }

    pub fn to_json(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data: None,
        }
    }
}

impl From<DiffError> for RpcError {
    fn from(err: DiffError) -> Self {
        match err {
            DiffError::Conflict(_) => RpcError::Conflict(err.to_string()),
            DiffError::Timeout { .. } => {
                RpcError::Timeout("Timeout waiting for user action".to_string())
            }
            DiffError::Abandoned(_) | DiffError::Editor(_) | DiffError::Internal(_) => {
                RpcError::Internal(err.to_string())
            }
        }
    }
}
