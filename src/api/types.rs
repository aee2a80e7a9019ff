//! API request and response types.
//!
//! Inbound messages are decoded leniently (flat `image`/`file` parts, nested
//! A2A file parts, `data:` URLs) into a [`Request`]; everything sent back uses
//! the A2A shapes (`Task`, `Message`, status and artifact update events).

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::request::{Attachment, Request, RequestPart};

/// Current time as an RFC 3339 string.
pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

/// Why an inbound envelope was rejected before any task was created.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("message has no parts")]
    NoParts,

    #[error("unknown part kind '{0}'")]
    UnknownPartKind(String),

    #[error("{kind} part is missing '{field}'")]
    MissingField { kind: String, field: &'static str },

    #[error("part {index} is not valid base64: {reason}")]
    InvalidBase64 { index: usize, reason: String },

    #[error("messages sent to the agent must have role 'user', got '{0}'")]
    InvalidRole(String),
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Accepted, not yet started
    Submitted,
    /// Being classified or handled
    Working,
    /// Waiting for a follow-up message
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        }
    }

    /// Completed, failed and canceled tasks never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// States that end a stream or a blocking call.
    pub fn is_final(&self) -> bool {
        self.is_terminal() || *self == TaskState::InputRequired
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (*self, next),
            (Submitted, Working | Failed | Canceled)
                | (Working, Working | InputRequired | Completed | Failed | Canceled)
                | (InputRequired, Working | Canceled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// Base64 file payload of an outbound part.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mime_type: String,
    pub bytes: String,
}

/// One outbound message or artifact part.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    File { file: FileContent },
    Data { data: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub kind: &'static str,
}

impl Message {
    /// A text message from the agent about `task_id`.
    pub fn agent_text(text: impl Into<String>, task_id: Uuid, context_id: &str) -> Self {
        Self {
            role: Role::Agent,
            parts: vec![Part::text(text)],
            message_id: Uuid::new_v4().to_string(),
            task_id: Some(task_id),
            context_id: Some(context_id.to_string()),
            kind: "message",
        }
    }

    /// First text part, if any.
    pub fn text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub artifact_id: String,
    pub name: String,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Artifact {
    pub fn new(name: &str, parts: Vec<Part>) -> Self {
        Self {
            artifact_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            parts,
            metadata: None,
        }
    }
}

/// Full task state including results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub context_id: String,
    pub status: TaskStatus,
    pub history: Vec<Message>,
    pub artifacts: Vec<Artifact>,
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    pub task_id: Uuid,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskArtifactUpdateEvent {
    pub task_id: Uuid,
    pub context_id: String,
    pub artifact: Artifact,
    pub last_chunk: bool,
    pub kind: &'static str,
}

/// Everything a task stream can carry. Each variant has its own `kind`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TaskEvent {
    Task(Task),
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

impl TaskEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            TaskEvent::Task(_) => "task",
            TaskEvent::StatusUpdate(_) => "status-update",
            TaskEvent::ArtifactUpdate(_) => "artifact-update",
        }
    }

    /// Whether this is the last event of a stream.
    pub fn is_final(&self) -> bool {
        match self {
            TaskEvent::Task(task) => task.status.state.is_final(),
            TaskEvent::StatusUpdate(update) => update.is_final,
            TaskEvent::ArtifactUpdate(_) => false,
        }
    }
}

/// Nested A2A file object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFile {
    pub bytes: Option<String>,
    pub data: Option<String>,
    #[serde(alias = "mime_type")]
    pub mime_type: Option<String>,
    pub name: Option<String>,
}

/// A part as clients send it; validated by [`InboundMessage::to_request`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundPart {
    #[serde(alias = "type")]
    pub kind: Option<String>,
    pub text: Option<String>,
    pub data: Option<Value>,
    pub bytes: Option<String>,
    #[serde(alias = "mime_type")]
    pub mime_type: Option<String>,
    pub file: Option<InboundFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<InboundPart>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub context_id: Option<String>,
}

/// Parameters of `message/send` and `message/stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageSendParams {
    pub message: InboundMessage,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Parameters of `tasks/get` and `tasks/cancel`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskIdParams {
    #[serde(alias = "taskId")]
    pub id: String,
}

/// Split a `data:<mime>;base64,<payload>` URL.
fn split_data_url(value: &str) -> Option<(Option<String>, &str)> {
    let rest = value.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    Some((mime, payload))
}

fn decode_attachment(index: usize, kind: &str, part: &InboundPart) -> Result<Attachment, EnvelopeError> {
    let nested = part.file.clone().unwrap_or_default();
    let raw = nested
        .bytes
        .or(nested.data)
        .or_else(|| part.bytes.clone())
        .or_else(|| part.data.as_ref().and_then(Value::as_str).map(str::to_string))
        .ok_or_else(|| EnvelopeError::MissingField {
            kind: kind.to_string(),
            field: "data",
        })?;

    let declared = nested.mime_type.or_else(|| part.mime_type.clone());
    let (url_mime, payload) = match split_data_url(&raw) {
        Some((mime, payload)) => (mime, payload.to_string()),
        None => (None, raw),
    };
    let mime_type = declared
        .or(url_mime)
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let data = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| EnvelopeError::InvalidBase64 {
            index,
            reason: e.to_string(),
        })?;

    Ok(Attachment { mime_type, data })
}

impl InboundMessage {
    /// Validate the parts and build the dispatcher's request.
    pub fn to_request(&self) -> Result<Request, EnvelopeError> {
        // An absent role is read as "user".
        if let Some(role) = &self.role {
            if !role.trim().eq_ignore_ascii_case("user") {
                return Err(EnvelopeError::InvalidRole(role.clone()));
            }
        }
        if self.parts.is_empty() {
            return Err(EnvelopeError::NoParts);
        }
        let mut parts = Vec::with_capacity(self.parts.len());
        for (index, part) in self.parts.iter().enumerate() {
            let kind = match (&part.kind, &part.text) {
                (Some(kind), _) => kind.clone(),
                (None, Some(_)) => "text".to_string(),
                (None, None) => String::new(),
            };
            match kind.as_str() {
                "text" => {
                    let text = part.text.clone().ok_or_else(|| EnvelopeError::MissingField {
                        kind: kind.clone(),
                        field: "text",
                    })?;
                    parts.push(RequestPart::Text(text));
                }
                "image" | "file" => {
                    parts.push(RequestPart::Attachment(decode_attachment(index, &kind, part)?));
                }
                other => return Err(EnvelopeError::UnknownPartKind(other.to_string())),
            }
        }
        Ok(Request::new(parts))
    }

    /// Echo of this message for task history.
    pub fn to_history(&self, request: &Request, task_id: Uuid, context_id: &str) -> Message {
        let parts = request
            .parts
            .iter()
            .map(|p| match p {
                RequestPart::Text(text) => Part::text(text.clone()),
                RequestPart::Attachment(a) => Part::File {
                    file: FileContent {
                        name: None,
                        mime_type: a.mime_type.clone(),
                        bytes: base64::engine::general_purpose::STANDARD.encode(&a.data),
                    },
                },
            })
            .collect();
        Message {
            role: Role::User,
            parts,
            message_id: self
                .message_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            task_id: Some(task_id),
            context_id: Some(context_id.to_string()),
            kind: "message",
        }
    }
}
