//! MCP JSON-RPC surface: envelope types and method dispatch.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sonar_telemetry::UsageEvent;

use crate::server::AppState;
use crate::tools;
use crate::upstream::format_reply;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
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

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Handle one decoded JSON-RPC request. Returns `None` for notifications
/// (requests without an id), which get no response body.
pub async fn dispatch(
    state: &AppState,
    request: JsonRpcRequest,
    client_ip: &str,
    user_agent: &str,
) -> Option<JsonRpcResponse> {
    let id = request.id?;

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "sonar-relay",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, tools::list_descriptors()),
        "tools/call" => handle_tool_call(state, id, &request.params, client_ip, user_agent).await,
        other => JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("method not supported: {other}"),
        ),
    };

    Some(response)
}

/// Resolve and invoke one tool. The telemetry event is recorded at dispatch
/// time, before the upstream call, so failed calls still count.
async fn handle_tool_call(
    state: &AppState,
    id: Value,
    params: &Value,
    client_ip: &str,
    user_agent: &str,
) -> JsonRpcResponse {
    let name = match params.get("name").and_then(|n| n.as_str()) {
        Some(name) => name,
        None => return JsonRpcResponse::error(id, INVALID_PARAMS, "missing tool name"),
    };

    let spec = match tools::find(name) {
        Some(spec) => spec,
        None => {
            return JsonRpcResponse::error(id, INVALID_PARAMS, format!("unknown tool: {name}"));
        }
    };

    let empty = json!({});
    let arguments = params.get("arguments").unwrap_or(&empty);
    let messages = match tools::build_messages(spec, arguments) {
        Some(messages) => messages,
        None => {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                "tool arguments must include a non-empty 'query' or 'messages'",
            );
        }
    };

    state.usage.record(UsageEvent::ToolCall {
        tool: spec.name.to_string(),
        client_ip: client_ip.to_string(),
        user_agent: user_agent.to_string(),
        at: Utc::now(),
    });

    let correlation_id = uuid::Uuid::new_v4().to_string();
    match state
        .upstream
        .complete(spec.model, messages, &correlation_id)
        .await
    {
        Ok(reply) => JsonRpcResponse::success(
            id,
            json!({
                "content": [{ "type": "text", "text": format_reply(&reply) }],
            }),
        ),
        Err(e) => {
            tracing::warn!(tool = %spec.name, error = %e, "Tool call failed upstream");
            // Upstream failures are tool results, not protocol errors.
            JsonRpcResponse::success(
                id,
                json!({
                    "content": [{ "type": "text", "text": format!("Tool call failed: {e}") }],
                    "isError": true,
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_state;

    fn request(method: &str, params: Value, id: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_tools_capability() {
        let state = test_state();
        let response = dispatch(&state, request("initialize", json!({}), Some(json!(1))), "10.0.0.1", "test")
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert!(result["capabilities"].get("tools").is_some());
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let state = test_state();
        let response = dispatch(
            &state,
            request("notifications/initialized", json!({}), None),
            "10.0.0.1",
            "test",
        )
        .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let state = test_state();
        let response = dispatch(&state, request("resources/list", json!({}), Some(json!(2))), "10.0.0.1", "test")
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn tool_call_with_unknown_tool_is_invalid_params() {
        let state = test_state();
        let response = dispatch(
            &state,
            request("tools/call", json!({ "name": "nope" }), Some(json!(3))),
            "10.0.0.1",
            "test",
        )
        .await
        .unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
        // Unknown tools are rejected before any telemetry mutation.
        assert_eq!(state.usage.snapshot().total_tool_calls, 0);
    }

    #[tokio::test]
    async fn tool_call_without_arguments_is_invalid_params() {
        let state = test_state();
        let response = dispatch(
            &state,
            request("tools/call", json!({ "name": "perplexity_ask" }), Some(json!(4))),
            "10.0.0.1",
            "test",
        )
        .await
        .unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }
}
