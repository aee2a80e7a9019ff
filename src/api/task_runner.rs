//! Drives one task through dispatch to a final state.
//!
//! Each run is a spawned tokio task racing the dispatcher against the task's
//! cancel token. Whatever finishes second is discarded: a late result after a
//! cancel fails the store's transition check and is only logged.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::task_store::InMemoryTaskStore;
use super::types::{Artifact, Message, Part, TaskState};
use crate::agent::{DispatchObserver, Dispatcher};
use crate::request::Request;
use crate::tools::Capability;

/// Publishes a `working` status once the dispatcher has picked a capability.
struct StatusObserver {
    store: InMemoryTaskStore,
    task_id: Uuid,
    context_id: String,
}

#[async_trait]
impl DispatchObserver for StatusObserver {
    async fn routed(&self, capability: Capability) {
        let message = Message::agent_text(
            format!("Running {} capability", capability),
            self.task_id,
            &self.context_id,
        );
        if let Err(e) = self
            .store
            .update_status(self.task_id, TaskState::Working, Some(message))
            .await
        {
            tracing::debug!(task_id = %self.task_id, error = %e, "Skipping routing status");
        }
    }
}

#[derive(Clone)]
pub struct TaskRunner {
    store: InMemoryTaskStore,
    dispatcher: Arc<Dispatcher>,
}

impl TaskRunner {
    pub fn new(store: InMemoryTaskStore, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Run `request` for task `id` in the background.
    pub fn spawn(&self, id: Uuid, request: Request, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.store.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            run_task(store, dispatcher, id, request, cancel).await;
        })
    }
}

async fn run_task(
    store: InMemoryTaskStore,
    dispatcher: Arc<Dispatcher>,
    id: Uuid,
    request: Request,
    cancel: CancellationToken,
) {
    let task = match store.get(id).await {
        Ok(task) => task,
        Err(e) => {
            tracing::warn!(task_id = %id, error = %e, "Task vanished before it started");
            return;
        }
    };
    let context_id = task.context_id.clone();

    let routing = Message::agent_text("Routing request", id, &context_id);
    if let Err(e) = store
        .update_status(id, TaskState::Working, Some(routing))
        .await
    {
        tracing::debug!(task_id = %id, error = %e, "Task not runnable");
        return;
    }

    let observer = StatusObserver {
        store: store.clone(),
        task_id: id,
        context_id: context_id.clone(),
    };

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!(task_id = %id, "Task canceled while running; handler dropped");
            return;
        }
        outcome = dispatcher.dispatch(&request, &observer) => outcome,
    };

    let finished = match outcome {
        Ok(result) => {
            tracing::info!(task_id = %id, "Task completed");
            let mut artifact = Artifact::new("result", vec![Part::text(result.text.clone())]);
            artifact.metadata = result.metadata.clone();
            let answer = Message::agent_text(result.text.clone(), id, &context_id);
            store.complete(id, artifact, answer).await.map(|_| ())
        }
        Err(e) => match e.needs_input() {
            Some(question) => {
                tracing::info!(task_id = %id, "Task needs more input");
                let prompt = Message::agent_text(question, id, &context_id);
                store
                    .update_status(id, TaskState::InputRequired, Some(prompt))
                    .await
                    .map(|_| ())
            }
            None => {
                let message = e.user_message();
                tracing::warn!(task_id = %id, kind = e.kind(), error = %message, "Task failed");
                let mut artifact = Artifact::new("error", vec![Part::text(message.clone())]);
                artifact.metadata = Some(json!({ "error": e.kind() }));
                let notice = Message::agent_text(message, id, &context_id);
                store.fail(id, artifact, notice).await.map(|_| ())
            }
        },
    };

    if let Err(e) = finished {
        tracing::debug!(task_id = %id, error = %e, "Discarding late task result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::InboundMessage;
    use crate::llm::testing::ScriptedLlm;
    use crate::tools::hash::HashTool;
    use crate::tools::{CapabilityResult, Tool, ToolError, ToolRegistry};
    use serde_json::json;
    use std::time::Duration;

    struct Sleeper;

    #[async_trait]
    impl Tool for Sleeper {
        fn capability(&self) -> Capability {
            Capability::WebGame
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _request: &Request) -> Result<CapabilityResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(CapabilityResult::text("too late"))
        }
    }

    fn runner(replies: &[&str]) -> (TaskRunner, InMemoryTaskStore) {
        let tools = ToolRegistry::new()
            .with(Arc::new(HashTool))
            .with(Arc::new(Sleeper));
        let dispatcher = Dispatcher::new(
            Arc::new(ScriptedLlm::replying(replies)),
            tools,
            Duration::from_secs(30),
        );
        let store = InMemoryTaskStore::new();
        (TaskRunner::new(store.clone(), Arc::new(dispatcher)), store)
    }

    async fn submit(store: &InMemoryTaskStore, text: &str) -> (Uuid, Request, CancellationToken) {
        let message: InboundMessage =
            serde_json::from_value(json!({"parts": [{"kind": "text", "text": text}]}))
                .expect("message");
        let request = message.to_request().expect("request");
        let (task, _rx) = store.create(&message, request).await;
        let (request, cancel) = store.execution(task.id).await.expect("execution");
        (task.id, request, cancel)
    }

    #[tokio::test]
    async fn test_success_attaches_result_and_completes() {
        let (runner, store) = runner(&["hash"]);
        let (id, request, cancel) = submit(&store, r#"md5 of "hello""#).await;
        runner.spawn(id, request, cancel).await.expect("join");

        let task = store.get(id).await.expect("task");
        assert_eq!(task.status.state, TaskState::Completed);
        assert_eq!(task.artifacts.len(), 1);
        assert_eq!(task.artifacts[0].name, "result");
        assert_eq!(
            task.artifacts[0].parts[0],
            Part::text("5d41402abc4b2a76b9719d911017c592")
        );
        assert_eq!(task.history.len(), 2);
        assert_eq!(
            task.history[1].parts[0],
            Part::text("5d41402abc4b2a76b9719d911017c592")
        );
    }

    #[tokio::test]
    async fn test_failure_records_error_artifact() {
        let (runner, store) = runner(&["hash"]);
        let (id, request, cancel) = submit(&store, r#"sha1 of "hello""#).await;
        runner.spawn(id, request, cancel).await.expect("join");

        let task = store.get(id).await.expect("task");
        assert_eq!(task.status.state, TaskState::Failed);
        assert_eq!(task.artifacts.len(), 1);
        assert_eq!(task.artifacts[0].name, "error");
        assert_eq!(
            task.artifacts[0].metadata,
            Some(json!({"error": "unsupported-algorithm"}))
        );
    }

    #[tokio::test]
    async fn test_needs_input_then_follow_up_completes() {
        let (runner, store) = runner(&["hash", "hash"]);
        let (id, request, cancel) = submit(&store, "compute the md5 please").await;
        runner.spawn(id, request, cancel).await.expect("join");
        let task = store.get(id).await.expect("task");
        assert_eq!(task.status.state, TaskState::InputRequired);
        assert!(task.artifacts.is_empty());

        let follow: InboundMessage =
            serde_json::from_value(json!({"parts": [{"kind": "text", "text": "\"hello\""}]}))
                .expect("follow-up");
        let follow_request = follow.to_request().expect("request");
        let (_, combined, cancel) = store.resume(id, &follow, follow_request).await.expect("resume");
        runner.spawn(id, combined, cancel).await.expect("join");

        let task = store.get(id).await.expect("task");
        assert_eq!(task.status.state, TaskState::Completed);
        assert_eq!(
            task.artifacts[0].parts[0],
            Part::text("5d41402abc4b2a76b9719d911017c592")
        );
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_handler() {
        let (runner, store) = runner(&["web-game"]);
        let (id, request, cancel) = submit(&store, "play tic-tac-toe").await;
        let handle = runner.spawn(id, request, cancel);

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.cancel(id).await.expect("cancel");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("runner stops promptly")
            .expect("join");

        let task = store.get(id).await.expect("task");
        assert_eq!(task.status.state, TaskState::Canceled);
        assert!(task.artifacts.is_empty());
    }
}
