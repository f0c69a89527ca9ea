// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! JSON-RPC 2.0 dispatch for the orchestration tools
//!
//! The method name is the tool name and `params` are its arguments. The
//! router is transport-agnostic; [`ToolRouter::serve_stdio`] speaks it one
//! request per line over stdin/stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use super::Orchestrator;
use crate::errors::{AgentflowError, ErrorKind};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Tool failed for a process, state or IO reason
pub const TOOL_ERROR: i64 = -32000;

/// Tool names accepted as methods
pub const TOOLS: [&str; 6] = [
    "run_agent",
    "run_pipeline",
    "list_agents",
    "get_status",
    "send_message",
    "stop_agents",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// `None` for notifications
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Failure of one routed call
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error(transparent)]
    Tool(#[from] AgentflowError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::Tool(e) if e.kind() == ErrorKind::Config => INVALID_PARAMS,
            Self::Tool(_) => TOOL_ERROR,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    pub fn to_response(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::error(id, self.code(), self.to_string())
    }
}

/// Routes JSON-RPC requests to an [`Orchestrator`]
#[derive(Clone)]
pub struct ToolRouter {
    orchestrator: Arc<Orchestrator>,
}

impl ToolRouter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Handle one raw request; `None` for notifications
    pub async fn handle_request(&self, raw: &str) -> Option<String> {
        let response = match serde_json::from_str::<JsonRpcRequest>(raw) {
            Ok(request) => {
                let notification = request.id.is_none();
                let response = self.dispatch(request).await;
                if notification {
                    return None;
                }
                response
            }
            Err(e) => JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e)),
        };

        Some(serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Failed to serialize response"},"id":null}"#.into()
        }))
    }

    /// Dispatch a parsed request
    pub async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error(
                request.id,
                INVALID_REQUEST,
                "Invalid JSON-RPC version, expected \"2.0\"",
            );
        }

        let id = request.id.clone();
        let params = request
            .params
            .unwrap_or(Value::Object(Default::default()));

        debug!(method = %request.method, "dispatching tool call");
        match self.route(&request.method, params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => err.to_response(id),
        }
    }

    async fn route(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let orch = &self.orchestrator;
        match method {
            "run_agent" => to_value(orch.run_agent(parse_params(params)?).await?),
            "run_pipeline" => to_value(orch.run_pipeline(parse_params(params)?).await?),
            "list_agents" => to_value(orch.list_agents()),
            "get_status" => to_value(orch.get_status(parse_params(params)?).await?),
            "send_message" => to_value(orch.send_message(parse_params(params)?).await),
            "stop_agents" => to_value(orch.stop_agents(parse_params(params)?).await?),
            _ => Err(RpcError::MethodNotFound(method.to_string())),
        }
    }

    /// Serve requests line by line until stdin closes
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        info!(tools = ?TOOLS, "serving tools over stdio");

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_request(&line).await {
                stdout.write_all(response.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        info!("stdin closed; stopping tool server");
        Ok(())
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn to_value<T: Serialize>(result: T) -> Result<Value, RpcError> {
    serde_json::to_value(result).map_err(|e| RpcError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::AgentSet;
    use tempfile::TempDir;

    fn router(dir: &TempDir) -> ToolRouter {
        let set = AgentSet::from_yaml(
            r#"
name: rpc
agents:
  - name: architect
    output: architecture.md
"#,
        )
        .unwrap();
        let orchestrator = Orchestrator::open(
            set,
            dir.path().to_path_buf(),
            Some(dir.path().join("state")),
        )
        .unwrap();
        ToolRouter::new(Arc::new(orchestrator))
    }

    async fn call(router: &ToolRouter, raw: &str) -> Value {
        let response = router.handle_request(raw).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[tokio::test]
    async fn test_list_agents_call() {
        let dir = TempDir::new().unwrap();
        let response = call(
            &router(&dir),
            r#"{"jsonrpc":"2.0","id":1,"method":"list_agents"}"#,
        )
        .await;

        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["agents"][0]["name"], "architect");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let dir = TempDir::new().unwrap();
        let response = call(
            &router(&dir),
            r#"{"jsonrpc":"2.0","id":"a","method":"delete_everything"}"#,
        )
        .await;

        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_parse_error_and_bad_version() {
        let dir = TempDir::new().unwrap();
        let router = router(&dir);

        let response = call(&router, "{not json").await;
        assert_eq!(response["error"]["code"], PARSE_ERROR);

        let response = call(&router, r#"{"jsonrpc":"1.0","id":2,"method":"list_agents"}"#).await;
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_params_are_invalid() {
        let dir = TempDir::new().unwrap();
        let response = call(
            &router(&dir),
            r#"{"jsonrpc":"2.0","id":3,"method":"send_message","params":{"agent_name":"architect"}}"#,
        )
        .await;

        assert_eq!(response["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let dir = TempDir::new().unwrap();
        let response = router(&dir)
            .handle_request(r#"{"jsonrpc":"2.0","method":"list_agents"}"#)
            .await;

        assert!(response.is_none());
    }
}
