//! Agent module - routing of requests to capability handlers.
//!
//! The agent follows a "classify then delegate" pattern:
//! 1. Build a routing prompt listing the registered capabilities
//! 2. Ask the LLM for exactly one capability name
//! 3. Run that capability's handler on the original request
//!
//! [`Agent`] owns the wiring: it constructs the LLM client, memory store and
//! browser driver once and injects them into the handlers and the
//! [`Dispatcher`].

mod dispatcher;
mod prompt;

pub use dispatcher::{
    parse_selection, DispatchError, DispatchObserver, Dispatcher, NoopObserver, RetryPolicy,
    RoutingError,
};
pub use prompt::build_routing_prompt;

use std::sync::Arc;

use crate::config::Config;
use crate::llm::{GeminiClient, LlmClient};
use crate::tools::code::CodeRunner;
use crate::tools::hash::HashTool;
use crate::tools::image::ImageLabeler;
use crate::tools::math::MathSolver;
use crate::tools::memory::{MemoryStore, MemoryTool};
use crate::tools::web::browser::{BrowserDriver, WebDriverClient};
use crate::tools::web::WebGame;
use crate::tools::ToolRegistry;

/// The assembled agent: configuration plus a ready dispatcher.
pub struct Agent {
    config: Config,
    dispatcher: Arc<Dispatcher>,
}

impl Agent {
    /// Create an agent talking to Gemini and the configured WebDriver.
    pub fn new(config: Config) -> Self {
        let llm: Arc<dyn LlmClient> = Arc::new(GeminiClient::new(
            config.api_key.clone(),
            config.model.clone(),
            config.llm_base_url.clone(),
            config.handler_timeout,
        ));
        let driver: Arc<dyn BrowserDriver> = Arc::new(WebDriverClient::new(config.webdriver_url.clone()));
        Self::with_services(config, llm, driver)
    }

    /// Create an agent around explicit service clients.
    pub fn with_services(config: Config, llm: Arc<dyn LlmClient>, driver: Arc<dyn BrowserDriver>) -> Self {
        let memory = Arc::new(MemoryStore::new(config.memory_file.clone()));
        tracing::info!(
            model = %config.model,
            memory_file = %config.memory_file.display(),
            webdriver = %config.webdriver_url,
            "Building agent"
        );

        let tools = ToolRegistry::new()
            .with(Arc::new(MathSolver::new(Arc::clone(&llm))))
            .with(Arc::new(HashTool))
            .with(Arc::new(ImageLabeler::new(Arc::clone(&llm))))
            .with(Arc::new(WebGame::new(driver, config.tictactoe_url.clone())))
            .with(Arc::new(CodeRunner::new(Arc::clone(&llm), config.code.clone())))
            .with(Arc::new(MemoryTool::new(memory)));

        let dispatcher = Arc::new(Dispatcher::new(llm, tools, config.handler_timeout));
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::request::Request;
    use crate::tools::Capability;

    #[test]
    fn test_agent_registers_every_capability() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new("test-key".to_string(), dir.path().join("memory.json"));
        let agent = Agent::with_services(
            config,
            Arc::new(ScriptedLlm::replying(&[])),
            Arc::new(WebDriverClient::new("http://127.0.0.1:1")),
        );

        let names: Vec<&str> = agent
            .dispatcher()
            .tools()
            .list_tools()
            .iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["math", "hash", "image", "web-game", "code", "memory"]);
    }

    #[tokio::test]
    async fn test_memory_survives_across_dispatches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new("test-key".to_string(), dir.path().join("memory.json"));
        let llm = Arc::new(ScriptedLlm::replying(&["memory", "memory"]));
        let agent = Agent::with_services(config, llm, Arc::new(WebDriverClient::new("http://127.0.0.1:1")));
        let dispatcher = agent.dispatcher();

        dispatcher
            .dispatch(&Request::text("Remember favorite_color = blue"), &NoopObserver)
            .await
            .expect("store");
        let answer = dispatcher
            .dispatch(&Request::text("What is my favorite_color?"), &NoopObserver)
            .await
            .expect("retrieve");
        assert_eq!(answer.text, "blue");
        assert_eq!(
            dispatcher.tools().get(Capability::Memory).map(|t| t.capability()),
            Some(Capability::Memory)
        );
    }
}
