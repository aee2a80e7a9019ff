//! Capability handlers.
//!
//! Each handler solves one demo task by calling exactly one external service
//! (or a pure computation) and normalizing the answer to plain text. Handlers
//! share the [`Tool`] interface and are looked up by [`Capability`] in a
//! [`ToolRegistry`].

pub mod code;
pub mod hash;
pub mod image;
pub mod math;
pub mod memory;
pub mod web;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::LlmError;
use crate::request::Request;

/// The closed set of things this agent can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Math,
    Hash,
    Image,
    WebGame,
    Code,
    Memory,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Math,
        Capability::Hash,
        Capability::Image,
        Capability::WebGame,
        Capability::Code,
        Capability::Memory,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Math => "math",
            Capability::Hash => "hash",
            Capability::Image => "image",
            Capability::WebGame => "web-game",
            Capability::Code => "code",
            Capability::Memory => "memory",
        }
    }

    /// Match a single normalized token against names and known aliases.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "math" | "arithmetic" => Some(Capability::Math),
            "hash" | "hashing" => Some(Capability::Hash),
            "image" | "vision" => Some(Capability::Image),
            "web-game" | "web_game" | "webgame" | "web" => Some(Capability::WebGame),
            "code" => Some(Capability::Code),
            "memory" => Some(Capability::Memory),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final answer of one handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityResult {
    /// Plain-text answer shown to the user
    pub text: String,

    /// Capability-specific detail (hash steps, moves, stored key)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl CapabilityResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Failure kinds reported by capability handlers.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Could not extract a numeric expression: {0}")]
    MathParse(String),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Browser automation failed: {0}")]
    Automation(String),

    #[error("Code execution failed: {0}")]
    Execution(String),

    #[error("No memory stored for '{0}'")]
    KeyNotFound(String),

    /// The request lacks information the handler needs; the text is the
    /// question to ask the user.
    #[error("{0}")]
    NeedsInput(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ToolError {
    /// Stable kebab-case name reported with failed tasks.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::MathParse(_) => "math-parse",
            ToolError::UnsupportedAlgorithm(_) => "unsupported-algorithm",
            ToolError::UnsupportedMediaType(_) => "unsupported-media-type",
            ToolError::Automation(_) => "automation",
            ToolError::Execution(_) => "execution",
            ToolError::KeyNotFound(_) => "key-not-found",
            ToolError::NeedsInput(_) => "needs-input",
            ToolError::Timeout(_) => "timeout",
            ToolError::Transport(_) => "transport",
            ToolError::Storage(_) => "storage",
        }
    }
}

impl From<LlmError> for ToolError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout => ToolError::Timeout("LLM request".to_string()),
            other => ToolError::Transport(other.to_string()),
        }
    }
}

/// Interface every capability handler implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn capability(&self) -> Capability;

    /// Short description used in the routing prompt.
    fn description(&self) -> &str;

    /// Whether binary attachments are meaningful to this handler.
    fn accepts_attachments(&self) -> bool {
        false
    }

    /// Handler-specific bound; `None` uses the dispatcher default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, request: &Request) -> Result<CapabilityResult, ToolError>;
}

/// Name and description of a registered tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: String,
}

/// Capability handlers keyed by the capability they serve.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<Capability, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any handler for the same capability.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.capability(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn Tool>> {
        self.tools.get(&capability).cloned()
    }

    /// Registered tools in canonical capability order.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        Capability::ALL
            .iter()
            .filter_map(|c| self.tools.get(c))
            .map(|t| ToolInfo {
                name: t.capability().name(),
                description: t.description().to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_aliases() {
        assert_eq!(Capability::from_token("web"), Some(Capability::WebGame));
        assert_eq!(Capability::from_token("web-game"), Some(Capability::WebGame));
        assert_eq!(Capability::from_token("memory"), Some(Capability::Memory));
        assert_eq!(Capability::from_token("weather"), None);
    }

    #[test]
    fn test_capability_serializes_kebab_case() {
        let json = serde_json::to_string(&Capability::WebGame).expect("serialize");
        assert_eq!(json, "\"web-game\"");
    }

    #[test]
    fn test_llm_timeout_maps_to_tool_timeout() {
        assert!(matches!(
            ToolError::from(LlmError::Timeout),
            ToolError::Timeout(_)
        ));
        assert!(matches!(
            ToolError::from(LlmError::EmptyResponse),
            ToolError::Transport(_)
        ));
    }
}
