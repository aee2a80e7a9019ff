//! HTTP server: routing, shared state and lifecycle.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::a2a;
use super::card::AGENT_VERSION;
use super::jsonrpc;
use super::task_runner::TaskRunner;
use super::task_store::InMemoryTaskStore;
use crate::agent::{Agent, Dispatcher};
use crate::config::Config;

/// State shared by every handler.
pub struct AppState {
    pub config: Config,
    pub store: InMemoryTaskStore,
    pub runner: TaskRunner,
}

impl AppState {
    pub fn new(config: Config, dispatcher: Arc<Dispatcher>) -> Self {
        let store = InMemoryTaskStore::new();
        let runner = TaskRunner::new(store.clone(), dispatcher);
        Self {
            config,
            store,
            runner,
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": AGENT_VERSION,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(jsonrpc::handle))
        .route("/health", get(health))
        .route("/.well-known/agent-card.json", get(a2a::agent_card_handler))
        .route("/.well-known/agent.json", get(a2a::agent_card_handler))
        .route("/message/send", post(a2a::send))
        .route("/message/stream", post(a2a::stream))
        .route("/task/get", post(a2a::get))
        .route("/task/cancel", post(a2a::cancel))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the agent from `config` and serve until Ctrl+C.
pub async fn serve(config: Config) -> std::io::Result<()> {
    let agent = Agent::new(config);
    let config = agent.config().clone();
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, agent.dispatcher()));
    let app = router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "APE agent listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::tools::hash::HashTool;
    use crate::tools::ToolRegistry;
    use std::time::Duration;

    const MD5_HELLO: &str = "5d41402abc4b2a76b9719d911017c592";

    /// Serve a hash-only agent on an ephemeral port; returns its base URL.
    async fn spawn_server(replies: &[&str]) -> String {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new("test-key".to_string(), dir.path().join("memory.json"));
        let tools = ToolRegistry::new().with(Arc::new(HashTool));
        let dispatcher = Dispatcher::new(
            Arc::new(ScriptedLlm::replying(replies)),
            tools,
            Duration::from_secs(30),
        );
        let app = router(Arc::new(AppState::new(config, Arc::new(dispatcher))));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });
        format!("http://{}", addr)
    }

    fn hash_message(text: &str) -> Value {
        json!({
            "message": {
                "role": "user",
                "messageId": "m-1",
                "parts": [{"kind": "text", "text": text}]
            }
        })
    }

    #[tokio::test]
    async fn test_send_then_get_and_cancel_terminal() {
        let base = spawn_server(&["hash"]).await;
        let client = reqwest::Client::new();

        let task: Value = client
            .post(format!("{}/message/send", base))
            .json(&hash_message(r#"md5 of "hello""#))
            .send()
            .await
            .expect("send")
            .json()
            .await
            .expect("task json");
        assert_eq!(task["kind"], "task");
        assert_eq!(task["status"]["state"], "completed");
        assert_eq!(task["artifacts"][0]["parts"][0]["text"], MD5_HELLO);
        assert_eq!(task["history"][0]["messageId"], "m-1");
        let id = task["id"].as_str().expect("id").to_string();

        let polled: Value = client
            .post(format!("{}/task/get", base))
            .json(&json!({"id": id}))
            .send()
            .await
            .expect("get")
            .json()
            .await
            .expect("get json");
        assert_eq!(polled["status"]["state"], "completed");

        let cancel = client
            .post(format!("{}/task/cancel", base))
            .json(&json!({"id": id}))
            .send()
            .await
            .expect("cancel");
        assert_eq!(cancel.status(), reqwest::StatusCode::CONFLICT);
        let body: Value = cancel.json().await.expect("error json");
        assert_eq!(body["error"]["code"], "task_not_cancelable");
    }

    #[tokio::test]
    async fn test_malformed_envelopes_are_rejected() {
        let base = spawn_server(&[]).await;
        let client = reqwest::Client::new();

        for body in [
            json!({"message": {"role": "user", "parts": []}}),
            json!({"message": {"parts": [{"kind": "video", "data": "x"}]}}),
            json!({"message": {"parts": [{"kind": "image", "data": "%%%", "mimeType": "image/png"}]}}),
            json!({"nothing": true}),
            json!({"message": {"role": "agent", "parts": [{"kind": "text", "text": "2 + 2"}]}}),
        ] {
            let response = client
                .post(format!("{}/message/send", base))
                .json(&body)
                .send()
                .await
                .expect("send");
            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST, "{}", body);
        }

        let response = client
            .post(format!("{}/message/send", base))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .expect("send");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let missing = client
            .post(format!("{}/task/get", base))
            .json(&json!({"id": "does-not-exist"}))
            .send()
            .await
            .expect("get");
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_agent_card_and_health() {
        let base = spawn_server(&[]).await;
        let client = reqwest::Client::new();

        for path in ["/.well-known/agent-card.json", "/.well-known/agent.json"] {
            let card: Value = client
                .get(format!("{}{}", base, path))
                .send()
                .await
                .expect("card")
                .json()
                .await
                .expect("card json");
            assert_eq!(card["name"], "APE Agent - Agent Protocol Evaluation");
            assert_eq!(card["capabilities"]["streaming"], true);
        }

        let health: Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .expect("health")
            .json()
            .await
            .expect("health json");
        assert_eq!(health["status"], "ok");
    }

    #[tokio::test]
    async fn test_stream_emits_task_then_updates_until_final() {
        let base = spawn_server(&["hash"]).await;
        let body = reqwest::Client::new()
            .post(format!("{}/message/stream", base))
            .json(&hash_message(r#"md5 of "hello""#))
            .send()
            .await
            .expect("stream")
            .text()
            .await
            .expect("body");

        let events: Vec<Value> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim()).expect("event json"))
            .collect();

        assert_eq!(events.first().map(|e| e["kind"].clone()), Some(json!("task")));
        assert_eq!(events[0]["status"]["state"], "submitted");
        let last = events.last().expect("final event");
        assert_eq!(last["kind"], "status-update");
        assert_eq!(last["final"], true);
        assert_eq!(last["status"]["state"], "completed");
        assert!(events
            .iter()
            .any(|e| e["kind"] == "artifact-update" && e["artifact"]["parts"][0]["text"] == MD5_HELLO));
    }

    #[tokio::test]
    async fn test_jsonrpc_methods_and_errors() {
        let base = spawn_server(&["hash"]).await;
        let client = reqwest::Client::new();
        let rpc = |body: Value| {
            let client = client.clone();
            let url = format!("{}/", base);
            async move {
                client
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .expect("rpc")
                    .json::<Value>()
                    .await
                    .expect("rpc json")
            }
        };

        let sent = rpc(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "message/send",
            "params": hash_message(r#"md5 of "hello""#)
        }))
        .await;
        assert_eq!(sent["id"], 1);
        assert_eq!(sent["result"]["status"]["state"], "completed");
        let task_id = sent["result"]["id"].as_str().expect("task id").to_string();

        let got = rpc(json!({"jsonrpc": "2.0", "id": 2, "method": "tasks/get", "params": {"id": task_id}})).await;
        assert_eq!(got["result"]["artifacts"][0]["parts"][0]["text"], MD5_HELLO);

        let canceled = rpc(json!({"jsonrpc": "2.0", "id": 3, "method": "tasks/cancel", "params": {"id": task_id}})).await;
        assert_eq!(canceled["error"]["code"], jsonrpc::TASK_NOT_CANCELABLE);

        let missing = rpc(json!({"jsonrpc": "2.0", "id": 4, "method": "tasks/get", "params": {"id": "nope"}})).await;
        assert_eq!(missing["error"]["code"], jsonrpc::TASK_NOT_FOUND);

        let unknown = rpc(json!({"jsonrpc": "2.0", "id": 5, "method": "agent/dance"})).await;
        assert_eq!(unknown["error"]["code"], jsonrpc::METHOD_NOT_FOUND);

        let bad_version = rpc(json!({"jsonrpc": "1.0", "id": 6, "method": "tasks/get"})).await;
        assert_eq!(bad_version["error"]["code"], jsonrpc::INVALID_REQUEST);

        let parse: Value = client
            .post(format!("{}/", base))
            .header("content-type", "application/json")
            .body("{oops")
            .send()
            .await
            .expect("rpc")
            .json()
            .await
            .expect("rpc json");
        assert_eq!(parse["error"]["code"], jsonrpc::PARSE_ERROR);
        assert_eq!(parse["id"], Value::Null);
    }
}
