//! A2A task operations and their plain-HTTP handlers.
//!
//! The operations (`send_message`, `stream_message`, `get_task`,
//! `cancel_task`) are shared with the JSON-RPC entrypoint; only the framing
//! differs.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::card::{agent_card, AgentCard};
use super::routes::AppState;
use super::task_store::{parse_task_id, TaskError};
use super::types::{
    EnvelopeError, Message, MessageSendParams, Task, TaskEvent, TaskIdParams, TaskState,
};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Errors returned before or instead of a task result.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid message: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_) | ApiError::Envelope(_) => StatusCode::BAD_REQUEST,
            ApiError::Task(TaskError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Task(_) => StatusCode::CONFLICT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidBody(_) => "invalid_request",
            ApiError::Envelope(_) => "invalid_message",
            ApiError::Task(TaskError::NotFound(_)) => "task_not_found",
            ApiError::Task(TaskError::NotCancelable { .. }) => "task_not_cancelable",
            ApiError::Task(TaskError::NotAwaitingInput { .. }) => "task_not_awaiting_input",
            ApiError::Task(TaskError::InvalidTransition { .. }) => "invalid_transition",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({
                "error": {
                    "code": self.code(),
                    "message": self.to_string(),
                }
            })),
        )
            .into_response()
    }
}

struct StartedTask {
    task: Task,
    events: broadcast::Receiver<TaskEvent>,
    handle: JoinHandle<()>,
}

/// Create a task (or resume an `input-required` one) and start running it.
///
/// The event receiver is subscribed before the runner starts, so no status
/// change is missed.
async fn start_task(state: &AppState, params: MessageSendParams) -> Result<StartedTask, ApiError> {
    let message = params.message;
    let request = message.to_request()?;

    match message.task_id.as_deref() {
        Some(raw) => {
            let id = parse_task_id(raw)?;
            let (_, events) = state.store.subscribe(id).await?;
            let (task, combined, cancel) = state.store.resume(id, &message, request).await?;
            let handle = state.runner.spawn(id, combined, cancel);
            Ok(StartedTask {
                task,
                events,
                handle,
            })
        }
        None => {
            let (task, events) = state.store.create(&message, request).await;
            let (request, cancel) = state.store.execution(task.id).await?;
            tracing::info!(
                task_id = %task.id,
                parts = request.parts.len(),
                attachments = request.has_attachments(),
                "Task submitted"
            );
            let handle = state.runner.spawn(task.id, request, cancel);
            Ok(StartedTask {
                task,
                events,
                handle,
            })
        }
    }
}

/// Run a message to its final state and return the task.
pub async fn send_message(state: &AppState, params: MessageSendParams) -> Result<Task, ApiError> {
    let started = start_task(state, params).await?;
    let id = started.task.id;
    drop(started.events);

    if let Err(e) = started.handle.await {
        tracing::error!(task_id = %id, error = %e, "Task runner panicked");
        let context_id = started.task.context_id.clone();
        let notice = Message::agent_text("Internal error while running task", id, &context_id);
        if let Err(e) = state
            .store
            .update_status(id, TaskState::Failed, Some(notice))
            .await
        {
            tracing::debug!(task_id = %id, error = %e, "Task already final after runner panic");
        }
    }

    Ok(state.store.get(id).await?)
}

/// Start a message and return its event sequence: the task snapshot first,
/// then status and artifact updates up to and including the final one.
pub async fn stream_message(
    state: Arc<AppState>,
    params: MessageSendParams,
) -> Result<(Uuid, impl Stream<Item = TaskEvent> + Send + 'static), ApiError> {
    let StartedTask {
        task, mut events, ..
    } = start_task(&state, params).await?;
    let id = task.id;
    let store = state.store.clone();

    let stream = async_stream::stream! {
        yield TaskEvent::Task(task);
        loop {
            match events.recv().await {
                Ok(ev) => {
                    let done = ev.is_final();
                    yield ev;
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(task_id = %id, skipped, "Task stream lagged; resending snapshot");
                    match store.get(id).await {
                        Ok(task) => {
                            let done = task.status.state.is_final();
                            yield TaskEvent::Task(task);
                            if done {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Ok((id, stream))
}

pub async fn get_task(state: &AppState, params: TaskIdParams) -> Result<Task, ApiError> {
    let id = parse_task_id(&params.id)?;
    Ok(state.store.get(id).await?)
}

pub async fn cancel_task(state: &AppState, params: TaskIdParams) -> Result<Task, ApiError> {
    let id = parse_task_id(&params.id)?;
    Ok(state.store.cancel(id).await?)
}

/// Frame task events as SSE, with keepalive comments while a handler runs.
pub(super) fn sse_response<S, F>(
    task_id: Uuid,
    events: S,
    encode: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = TaskEvent> + Send + 'static,
    F: Fn(&TaskEvent) -> Result<Event, axum::Error> + Send + 'static,
{
    struct StreamDropGuard {
        task_id: Uuid,
    }

    impl Drop for StreamDropGuard {
        fn drop(&mut self) {
            tracing::info!(task_id = %self.task_id, "Task SSE stream closed");
        }
    }

    tracing::info!(task_id = %task_id, "Task SSE stream opened");
    let drop_guard = StreamDropGuard { task_id };

    let stream = async_stream::stream! {
        let _guard = drop_guard;
        let mut events = Box::pin(events);

        let mut keepalive_interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        keepalive_interval.tick().await;

        loop {
            tokio::select! {
                next = events.next() => {
                    match next {
                        Some(ev) => {
                            tracing::debug!(task_id = %task_id, event = %ev.event_name(), "Task SSE event");
                            match encode(&ev) {
                                Ok(sse) => yield Ok(sse),
                                Err(e) => {
                                    tracing::error!(
                                        task_id = %task_id,
                                        event = %ev.event_name(),
                                        error = %e,
                                        "Failed to serialize SSE event; dropping"
                                    );
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = keepalive_interval.tick() => {
                    yield Ok(Event::default().comment("keepalive"));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    )
}

fn parse_body<T: DeserializeOwned>(payload: Result<Json<Value>, JsonRejection>) -> Result<T, ApiError> {
    let Json(value) = payload.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    serde_json::from_value(value).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

pub async fn agent_card_handler(State(state): State<Arc<AppState>>) -> Json<AgentCard> {
    Json(agent_card(&state.config.agent_url))
}

/// POST /message/send
pub async fn send(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let params = parse_body(payload)?;
    Ok(Json(send_message(&state, params).await?))
}

/// POST /message/stream
pub async fn stream(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let params = parse_body(payload)?;
    let (task_id, events) = stream_message(state, params).await?;
    Ok(sse_response(task_id, events, |ev| {
        Event::default().event(ev.event_name()).json_data(ev)
    }))
}

/// POST /task/get
pub async fn get(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let params = parse_body(payload)?;
    Ok(Json(get_task(&state, params).await?))
}

/// POST /task/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let params = parse_body(payload)?;
    Ok(Json(cancel_task(&state, params).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError::from(EnvelopeError::NoParts).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(TaskError::NotFound("x".to_string())).status(),
            StatusCode::NOT_FOUND
        );
        let not_cancelable = ApiError::from(TaskError::NotCancelable {
            id: Uuid::nil(),
            state: TaskState::Completed,
        });
        assert_eq!(not_cancelable.status(), StatusCode::CONFLICT);
        assert_eq!(not_cancelable.code(), "task_not_cancelable");
    }

    #[test]
    fn test_parse_body_rejects_missing_message() {
        let result: Result<MessageSendParams, _> = parse_body(Ok(Json(json!({"parts": []}))));
        assert!(matches!(result, Err(ApiError::InvalidBody(_))));
    }
}
