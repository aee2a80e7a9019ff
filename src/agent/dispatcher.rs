//! Request routing: one classification call, one handler invocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

use super::prompt::build_routing_prompt;
use crate::llm::{ContentPart, LlmClient, LlmError};
use crate::request::Request;
use crate::tools::{Capability, CapabilityResult, ToolError, ToolRegistry};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Could not tell which capability this request needs (classifier said '{0}')")]
    UnrecognizedIntent(String),

    #[error("The {0} capability does not accept attachments")]
    CapabilityMismatch(Capability),

    #[error("Request contains no text")]
    EmptyRequest,

    #[error("Classification failed: {0}")]
    Classification(#[from] LlmError),
}

impl RoutingError {
    pub fn kind(&self) -> &'static str {
        match self {
            RoutingError::UnrecognizedIntent(_) => "unrecognized-intent",
            RoutingError::CapabilityMismatch(_) => "capability-mismatch",
            RoutingError::EmptyRequest => "empty-request",
            RoutingError::Classification(_) => "transport",
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("{capability}: {source}")]
    Tool {
        capability: Capability,
        source: ToolError,
    },

    #[error("{capability} timed out after {}s", .after.as_secs_f32())]
    Timeout {
        capability: Capability,
        after: Duration,
    },
}

impl DispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Routing(e) => e.kind(),
            DispatchError::Tool { source, .. } => source.kind(),
            DispatchError::Timeout { .. } => "timeout",
        }
    }

    /// The handler's follow-up question when it needs more information.
    pub fn needs_input(&self) -> Option<&str> {
        match self {
            DispatchError::Tool {
                source: ToolError::NeedsInput(question),
                ..
            } => Some(question),
            _ => None,
        }
    }

    /// Message shown to the client; tool errors stand on their own.
    pub fn user_message(&self) -> String {
        match self {
            DispatchError::Tool { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

/// Told which capability was chosen before its handler runs.
#[async_trait]
pub trait DispatchObserver: Send + Sync {
    async fn routed(&self, capability: Capability);
}

/// Observer that ignores routing decisions.
pub struct NoopObserver;

#[async_trait]
impl DispatchObserver for NoopObserver {
    async fn routed(&self, _capability: Capability) {}
}

/// Delay before the single retry of a failed classification call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Upper bound of the random extra delay
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    fn delay(&self) -> Duration {
        let max_jitter = self.jitter.as_millis() as u64;
        let extra = rand::thread_rng().gen_range(0..=max_jitter);
        self.base_delay + Duration::from_millis(extra)
    }
}

/// Interpret the classifier's reply as exactly one capability.
///
/// Case, punctuation and backticks are ignored. Replies naming no known
/// capability, or more than one, are unrecognized.
pub fn parse_selection(reply: &str) -> Result<Capability, RoutingError> {
    let normalized = reply.to_lowercase();
    let mut found: Vec<Capability> = Vec::new();
    for token in normalized
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .map(|t| t.trim_matches(|c| c == '-' || c == '_'))
        .filter(|t| !t.is_empty())
    {
        if let Some(capability) = Capability::from_token(token) {
            if !found.contains(&capability) {
                found.push(capability);
            }
        }
    }
    match found.as_slice() {
        [only] => Ok(*only),
        _ => Err(RoutingError::UnrecognizedIntent(reply.trim().to_string())),
    }
}

/// Routes each request to exactly one capability handler.
pub struct Dispatcher {
    classifier: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    handler_timeout: Duration,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(classifier: Arc<dyn LlmClient>, tools: ToolRegistry, handler_timeout: Duration) -> Self {
        Self {
            classifier,
            tools,
            handler_timeout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Ask the classifier which capability serves `request`.
    pub async fn classify(&self, request: &Request) -> Result<Capability, RoutingError> {
        if !request.has_text() {
            return Err(RoutingError::EmptyRequest);
        }
        let prompt = [ContentPart::text(build_routing_prompt(request, &self.tools))];

        let reply = match self.classifier.generate(&prompt).await {
            Ok(reply) => reply,
            Err(e) if e.is_transient() => {
                let delay = self.retry.delay();
                tracing::warn!(error = %e, delay_ms = delay.as_millis() as u64, "Classification failed, retrying once");
                tokio::time::sleep(delay).await;
                self.classifier.generate(&prompt).await?
            }
            Err(e) => return Err(e.into()),
        };

        let capability = parse_selection(&reply)?;
        tracing::debug!(reply = %reply.trim(), capability = %capability, "Classified request");
        Ok(capability)
    }

    /// Classify `request` and run the chosen handler with it.
    pub async fn dispatch(
        &self,
        request: &Request,
        observer: &dyn DispatchObserver,
    ) -> Result<CapabilityResult, DispatchError> {
        let capability = self.classify(request).await?;
        let tool = self
            .tools
            .get(capability)
            .ok_or_else(|| RoutingError::UnrecognizedIntent(capability.name().to_string()))?;

        if request.has_attachments() && !tool.accepts_attachments() {
            return Err(RoutingError::CapabilityMismatch(capability).into());
        }

        tracing::info!(capability = %capability, "Routing request");
        observer.routed(capability).await;

        let limit = tool.timeout().unwrap_or(self.handler_timeout);
        match tokio::time::timeout(limit, tool.execute(request)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(source)) => Err(DispatchError::Tool { capability, source }),
            Err(_) => Err(DispatchError::Timeout {
                capability,
                after: limit,
            }),
        }
    }
}
