//! JSON-RPC 2.0 entrypoint (`POST /`).
//!
//! Every reply is HTTP 200; failures travel in the `error` member.
//! `message/stream` answers with SSE whose `data` lines are JSON-RPC
//! responses wrapping each task event.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    response::{sse::Event, IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use super::a2a::{self, sse_response, ApiError};
use super::routes::AppState;
use super::task_store::TaskError;
use super::types::TaskEvent;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const TASK_NOT_FOUND: i64 = -32001;
pub const TASK_NOT_CANCELABLE: i64 = -32002;

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
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

    pub fn error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

impl IntoResponse for JsonRpcResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

fn api_error(id: Value, e: ApiError) -> JsonRpcResponse {
    let code = match &e {
        ApiError::InvalidBody(_) | ApiError::Envelope(_) => INVALID_PARAMS,
        ApiError::Task(TaskError::NotFound(_)) => TASK_NOT_FOUND,
        ApiError::Task(TaskError::NotCancelable { .. }) => TASK_NOT_CANCELABLE,
        ApiError::Task(_) => INVALID_PARAMS,
    };
    JsonRpcResponse::error(id, code, e.to_string(), Some(json!({ "code": e.code() })))
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

fn task_result<T: Serialize>(id: Value, result: Result<T, ApiError>) -> JsonRpcResponse {
    match result.map(|task| serde_json::to_value(task)) {
        Ok(Ok(value)) => JsonRpcResponse::success(id, value),
        Ok(Err(e)) => JsonRpcResponse::error(id, INTERNAL_ERROR, "Internal error", Some(json!(e.to_string()))),
        Err(e) => api_error(id, e),
    }
}

/// POST /
pub async fn handle(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return JsonRpcResponse::error(Value::Null, PARSE_ERROR, "Parse error", Some(json!(e.to_string())))
                .into_response();
        }
    };

    let Some(request) = value.as_object() else {
        return JsonRpcResponse::error(Value::Null, INVALID_REQUEST, "Invalid Request", None).into_response();
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return JsonRpcResponse::error(id, INVALID_REQUEST, "Invalid Request", Some(json!("jsonrpc must be \"2.0\"")))
            .into_response();
    }
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return JsonRpcResponse::error(id, INVALID_REQUEST, "Invalid Request", Some(json!("missing method")))
            .into_response();
    };
    let raw_params = request.get("params").cloned().unwrap_or(Value::Null);
    tracing::debug!(method = %method, id = %id, "JSON-RPC request");

    match method {
        "message/send" => {
            let result = match params(raw_params) {
                Ok(p) => a2a::send_message(&state, p).await,
                Err(e) => Err(e),
            };
            task_result(id, result).into_response()
        }
        "message/stream" => {
            let started = match params(raw_params) {
                Ok(p) => a2a::stream_message(Arc::clone(&state), p).await,
                Err(e) => Err(e),
            };
            match started {
                Ok((task_id, events)) => sse_response(task_id, events, move |ev: &TaskEvent| {
                    Event::default()
                        .event(ev.event_name())
                        .json_data(JsonRpcResponse::success(id.clone(), json!(ev)))
                })
                .into_response(),
                Err(e) => api_error(id, e).into_response(),
            }
        }
        "tasks/get" => {
            let result = match params(raw_params) {
                Ok(p) => a2a::get_task(&state, p).await,
                Err(e) => Err(e),
            };
            task_result(id, result).into_response()
        }
        "tasks/cancel" => {
            let result = match params(raw_params) {
                Ok(p) => a2a::cancel_task(&state, p).await,
                Err(e) => Err(e),
            };
            task_result(id, result).into_response()
        }
        other => {
            tracing::warn!(method = %other, "Unknown JSON-RPC method");
            JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other), None)
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_codes() {
        let not_found = api_error(json!(1), ApiError::Task(TaskError::NotFound("x".to_string())));
        assert_eq!(not_found.error.as_ref().map(|e| e.code), Some(TASK_NOT_FOUND));

        let not_cancelable = api_error(
            json!(2),
            ApiError::Task(TaskError::NotCancelable {
                id: Uuid::nil(),
                state: crate::api::types::TaskState::Failed,
            }),
        );
        assert_eq!(
            not_cancelable.error.as_ref().map(|e| e.code),
            Some(TASK_NOT_CANCELABLE)
        );

        let bad = api_error(json!(3), ApiError::InvalidBody("missing field".to_string()));
        assert_eq!(bad.error.as_ref().map(|e| e.code), Some(INVALID_PARAMS));
    }

    #[test]
    fn test_response_omits_absent_members() {
        let value = serde_json::to_value(JsonRpcResponse::success(json!("a"), json!({"ok": true})))
            .expect("serialize");
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], "a");
        assert!(value.get("error").is_none());
    }
}
