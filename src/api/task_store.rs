//! In-memory task store (non-persistent).
//!
//! Owns every task's state, the request it was created from, its cancel
//! token and its event channel. All state changes go through here so the
//! transition rules and event publication cannot be bypassed.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{
    now_string, Artifact, InboundMessage, Message, Task, TaskArtifactUpdateEvent, TaskEvent,
    TaskState, TaskStatus, TaskStatusUpdateEvent,
};
use crate::request::Request;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(String),

    #[error("Task cannot move from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Task {id} is already {state} and cannot be canceled")]
    NotCancelable { id: Uuid, state: TaskState },

    #[error("Task {id} is {state}, not waiting for input")]
    NotAwaitingInput { id: Uuid, state: TaskState },
}

struct TaskEntry {
    task: Task,
    request: Request,
    cancel: CancellationToken,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskEntry {
    fn publish(&self, event: TaskEvent) {
        // No subscribers is fine; polling clients read the snapshot.
        let _ = self.events.send(event);
    }

    fn set_status(&mut self, state: TaskState, message: Option<Message>) -> Result<Task, TaskError> {
        let from = self.task.status.state;
        if !from.can_transition_to(state) {
            return Err(TaskError::InvalidTransition { from, to: state });
        }
        self.task.status = TaskStatus {
            state,
            message,
            timestamp: now_string(),
        };
        self.publish(TaskEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: self.task.id,
            context_id: self.task.context_id.clone(),
            status: self.task.status.clone(),
            is_final: state.is_final(),
            kind: "status-update",
        }));
        Ok(self.task.clone())
    }

    /// Attach `artifact` and move to the final `state` as one step, so a
    /// concurrent cancel either wins outright or sees the finished task.
    fn finish(
        &mut self,
        state: TaskState,
        artifact: Artifact,
        message: Message,
        record_in_history: bool,
    ) -> Result<Task, TaskError> {
        let from = self.task.status.state;
        if !from.can_transition_to(state) {
            return Err(TaskError::InvalidTransition { from, to: state });
        }
        self.task.artifacts.push(artifact.clone());
        self.publish(TaskEvent::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: self.task.id,
            context_id: self.task.context_id.clone(),
            artifact,
            last_chunk: true,
            kind: "artifact-update",
        }));
        if record_in_history {
            self.task.history.push(message.clone());
        }
        self.set_status(state, Some(message))
    }
}

pub fn parse_task_id(raw: &str) -> Result<Uuid, TaskError> {
    Uuid::parse_str(raw.trim()).map_err(|_| TaskError::NotFound(raw.to_string()))
}

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, TaskEntry>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task in `submitted` for `request`, echoing `message` into history.
    pub async fn create(
        &self,
        message: &InboundMessage,
        request: Request,
    ) -> (Task, broadcast::Receiver<TaskEvent>) {
        let id = Uuid::new_v4();
        let context_id = message
            .context_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let task = Task {
            id,
            context_id: context_id.clone(),
            status: TaskStatus {
                state: TaskState::Submitted,
                message: None,
                timestamp: now_string(),
            },
            history: vec![message.to_history(&request, id, &context_id)],
            artifacts: Vec::new(),
            kind: "task",
        };
        let (events, rx) = broadcast::channel(EVENT_CAPACITY);
        self.tasks.write().await.insert(
            id,
            TaskEntry {
                task: task.clone(),
                request,
                cancel: CancellationToken::new(),
                events,
            },
        );
        tracing::debug!(task_id = %id, "Task created");
        (task, rx)
    }

    pub async fn get(&self, id: Uuid) -> Result<Task, TaskError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .map(|e| e.task.clone())
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// The request to dispatch and the token that aborts it.
    pub async fn execution(
        &self,
        id: Uuid,
    ) -> Result<(Request, CancellationToken), TaskError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(&id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        Ok((entry.request.clone(), entry.cancel.clone()))
    }

    pub async fn subscribe(&self, id: Uuid) -> Result<(Task, broadcast::Receiver<TaskEvent>), TaskError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(&id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        Ok((entry.task.clone(), entry.events.subscribe()))
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        state: TaskState,
        message: Option<Message>,
    ) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        let task = entry.set_status(state, message)?;
        tracing::debug!(task_id = %id, state = %state, "Task status changed");
        Ok(task)
    }

    /// Record the answer artifact, append the answer to history and mark the
    /// task `completed`, atomically. Fails without changes if the task is
    /// already terminal (e.g. canceled).
    pub async fn complete(
        &self,
        id: Uuid,
        artifact: Artifact,
        answer: Message,
    ) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        let task = entry.finish(TaskState::Completed, artifact, answer, true)?;
        tracing::debug!(task_id = %id, "Task status changed to completed");
        Ok(task)
    }

    /// Record the error artifact and mark the task `failed`, atomically.
    pub async fn fail(
        &self,
        id: Uuid,
        artifact: Artifact,
        notice: Message,
    ) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        let task = entry.finish(TaskState::Failed, artifact, notice, false)?;
        tracing::debug!(task_id = %id, "Task status changed to failed");
        Ok(task)
    }

    /// Cancel a live task and signal its handler to stop.
    pub async fn cancel(&self, id: Uuid) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        let state = entry.task.status.state;
        if state.is_terminal() {
            return Err(TaskError::NotCancelable { id, state });
        }
        entry.cancel.cancel();
        let notice = Message::agent_text("Task canceled", id, &entry.task.context_id);
        let task = entry.set_status(TaskState::Canceled, Some(notice))?;
        tracing::info!(task_id = %id, from = %state, "Task canceled");
        Ok(task)
    }

    /// Feed a follow-up message to an `input-required` task and move it back
    /// to `working`. Returns the combined request to dispatch again.
    pub async fn resume(
        &self,
        id: Uuid,
        message: &InboundMessage,
        follow_up: Request,
    ) -> Result<(Task, Request, CancellationToken), TaskError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        let state = entry.task.status.state;
        if state != TaskState::InputRequired {
            return Err(TaskError::NotAwaitingInput { id, state });
        }

        let context_id = entry.task.context_id.clone();
        entry
            .task
            .history
            .push(message.to_history(&follow_up, id, &context_id));
        entry.request.extend(follow_up);
        let task = entry.set_status(TaskState::Working, None)?;
        tracing::info!(task_id = %id, "Task resumed with follow-up input");
        Ok((task, entry.request.clone(), entry.cancel.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::Part;
    use serde_json::json;

    fn inbound(text: &str) -> (InboundMessage, Request) {
        let message: InboundMessage =
            serde_json::from_value(json!({"role": "user", "parts": [{"kind": "text", "text": text}]}))
                .expect("message");
        let request = message.to_request().expect("request");
        (message, request)
    }

    #[tokio::test]
    async fn test_terminal_states_are_absorbing() {
        let store = InMemoryTaskStore::new();
        let (message, request) = inbound("2 + 2");
        let (task, _rx) = store.create(&message, request).await;

        store
            .update_status(task.id, TaskState::Working, None)
            .await
            .expect("working");
        store
            .update_status(task.id, TaskState::Completed, None)
            .await
            .expect("completed");

        for next in [TaskState::Working, TaskState::Failed, TaskState::Canceled] {
            assert!(matches!(
                store.update_status(task.id, next, None).await,
                Err(TaskError::InvalidTransition { .. })
            ));
        }
        assert_eq!(
            store.get(task.id).await.expect("get").status.state,
            TaskState::Completed
        );
    }

    #[tokio::test]
    async fn test_cancel_live_then_terminal() {
        let store = InMemoryTaskStore::new();
        let (message, request) = inbound("play tic-tac-toe");
        let (task, _rx) = store.create(&message, request).await;
        let (_, token) = store.execution(task.id).await.expect("execution");

        let canceled = store.cancel(task.id).await.expect("cancel");
        assert_eq!(canceled.status.state, TaskState::Canceled);
        assert!(token.is_cancelled());

        assert!(matches!(
            store.cancel(task.id).await,
            Err(TaskError::NotCancelable {
                state: TaskState::Canceled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_events_are_published_in_order() {
        let store = InMemoryTaskStore::new();
        let (message, request) = inbound("hash it");
        let (task, mut rx) = store.create(&message, request).await;

        store
            .update_status(task.id, TaskState::Working, None)
            .await
            .expect("working");
        let answer = Message::agent_text("x", task.id, &task.context_id);
        store
            .complete(task.id, Artifact::new("result", vec![Part::text("x")]), answer)
            .await
            .expect("completed");

        let names: Vec<(&str, bool)> = [
            rx.recv().await.expect("event 1"),
            rx.recv().await.expect("event 2"),
            rx.recv().await.expect("event 3"),
        ]
        .iter()
        .map(|e| (e.event_name(), e.is_final()))
        .collect();
        assert_eq!(
            names,
            vec![
                ("status-update", false),
                ("artifact-update", false),
                ("status-update", true)
            ]
        );
    }

    #[tokio::test]
    async fn test_completing_a_canceled_task_changes_nothing() {
        let store = InMemoryTaskStore::new();
        let (message, request) = inbound("what is 6 x 7");
        let (task, mut rx) = store.create(&message, request).await;
        store
            .update_status(task.id, TaskState::Working, None)
            .await
            .expect("working");
        store.cancel(task.id).await.expect("cancel");

        let answer = Message::agent_text("42", task.id, &task.context_id);
        let late = store
            .complete(task.id, Artifact::new("result", vec![Part::text("42")]), answer)
            .await;
        assert!(matches!(late, Err(TaskError::InvalidTransition { .. })));

        let notice = Message::agent_text("boom", task.id, &task.context_id);
        let late = store
            .fail(task.id, Artifact::new("error", vec![Part::text("boom")]), notice)
            .await;
        assert!(matches!(late, Err(TaskError::InvalidTransition { .. })));

        let snapshot = store.get(task.id).await.expect("get");
        assert_eq!(snapshot.status.state, TaskState::Canceled);
        assert!(snapshot.artifacts.is_empty());
        assert_eq!(snapshot.history.len(), 1);

        // working, canceled, and nothing after the final event.
        assert_eq!(rx.recv().await.expect("working").event_name(), "status-update");
        assert!(rx.recv().await.expect("canceled").is_final());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resume_requires_input_required() {
        let store = InMemoryTaskStore::new();
        let (message, request) = inbound("hash this");
        let (task, _rx) = store.create(&message, request).await;
        let (follow, follow_request) = inbound("\"hello\" with md5");

        assert!(matches!(
            store.resume(task.id, &follow, follow_request.clone()).await,
            Err(TaskError::NotAwaitingInput { .. })
        ));

        store
            .update_status(task.id, TaskState::Working, None)
            .await
            .expect("working");
        store
            .update_status(task.id, TaskState::InputRequired, None)
            .await
            .expect("input-required");

        let (resumed, combined, _) = store
            .resume(task.id, &follow, follow_request)
            .await
            .expect("resume");
        assert_eq!(resumed.status.state, TaskState::Working);
        assert_eq!(combined.text_content(), "hash this \"hello\" with md5");
        assert_eq!(resumed.history.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let store = InMemoryTaskStore::new();
        assert!(matches!(
            store.get(Uuid::new_v4()).await,
            Err(TaskError::NotFound(_))
        ));
        assert!(matches!(parse_task_id("nope"), Err(TaskError::NotFound(_))));
    }
}
