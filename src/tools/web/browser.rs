//! Minimal W3C WebDriver client.
//!
//! Only the handful of endpoints the game player needs: sessions,
//! navigation, element lookup by CSS selector, text/attribute reads,
//! clicks and the page source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

/// Key under which W3C WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("WebDriver unreachable: {0}")]
    Transport(String),

    #[error("WebDriver command {command} failed: {message}")]
    Command { command: String, message: String },

    #[error("Unexpected WebDriver response: {0}")]
    Protocol(String),

    #[error("No tic-tac-toe board (nine cells) found at {0}")]
    BoardNotFound(String),
}

impl From<reqwest::Error> for BrowserError {
    fn from(e: reqwest::Error) -> Self {
        BrowserError::Transport(e.to_string())
    }
}

/// Opaque element reference inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

/// Browser operations used by the game player.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Start a headless session and return its id.
    async fn open_session(&self) -> Result<String, BrowserError>;
    async fn navigate(&self, session: &str, url: &str) -> Result<(), BrowserError>;
    async fn find_elements(&self, session: &str, css: &str) -> Result<Vec<ElementId>, BrowserError>;
    async fn element_text(&self, session: &str, element: &ElementId) -> Result<String, BrowserError>;
    async fn element_attribute(
        &self,
        session: &str,
        element: &ElementId,
        name: &str,
    ) -> Result<Option<String>, BrowserError>;
    async fn click(&self, session: &str, element: &ElementId) -> Result<(), BrowserError>;
    async fn page_source(&self, session: &str) -> Result<String, BrowserError>;
    async fn close_session(&self, session: &str) -> Result<(), BrowserError>;
}

/// Talks to a chromedriver/geckodriver endpoint over HTTP.
pub struct WebDriverClient {
    client: reqwest::Client,
    base_url: String,
}

impl WebDriverClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Unwrap the `value` envelope and surface WebDriver errors.
    async fn send(&self, command: &str, request: reqwest::RequestBuilder) -> Result<Value, BrowserError> {
        let response = request.send().await?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);

        if !status.is_success() {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| value.get("error").and_then(Value::as_str))
                .unwrap_or("unknown error")
                .to_string();
            return Err(BrowserError::Command {
                command: command.to_string(),
                message,
            });
        }
        Ok(value)
    }
}

fn element_from(value: &Value) -> Option<ElementId> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementId(id.to_string()))
}

#[async_trait]
impl BrowserDriver for WebDriverClient {
    async fn open_session(&self) -> Result<String, BrowserError> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": ["--headless=new", "--no-sandbox", "--disable-dev-shm-usage", "--disable-gpu"]
                    }
                }
            }
        });
        let value = self
            .send("new session", self.client.post(self.url("/session")).json(&capabilities))
            .await?;
        value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol("new session response has no sessionId".to_string()))
    }

    async fn navigate(&self, session: &str, url: &str) -> Result<(), BrowserError> {
        self.send(
            "navigate",
            self.client
                .post(self.url(&format!("/session/{}/url", session)))
                .json(&json!({ "url": url })),
        )
        .await?;
        Ok(())
    }

    async fn find_elements(&self, session: &str, css: &str) -> Result<Vec<ElementId>, BrowserError> {
        let value = self
            .send(
                "find elements",
                self.client
                    .post(self.url(&format!("/session/{}/elements", session)))
                    .json(&json!({ "using": "css selector", "value": css })),
            )
            .await?;
        let elements = value
            .as_array()
            .ok_or_else(|| BrowserError::Protocol("find elements did not return a list".to_string()))?;
        Ok(elements.iter().filter_map(element_from).collect())
    }

    async fn element_text(&self, session: &str, element: &ElementId) -> Result<String, BrowserError> {
        let value = self
            .send(
                "element text",
                self.client
                    .get(self.url(&format!("/session/{}/element/{}/text", session, element.0))),
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn element_attribute(
        &self,
        session: &str,
        element: &ElementId,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        let value = self
            .send(
                "element attribute",
                self.client.get(self.url(&format!(
                    "/session/{}/element/{}/attribute/{}",
                    session, element.0, name
                ))),
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self, session: &str, element: &ElementId) -> Result<(), BrowserError> {
        self.send(
            "click",
            self.client
                .post(self.url(&format!("/session/{}/element/{}/click", session, element.0)))
                .json(&json!({})),
        )
        .await?;
        Ok(())
    }

    async fn page_source(&self, session: &str) -> Result<String, BrowserError> {
        let value = self
            .send(
                "page source",
                self.client.get(self.url(&format!("/session/{}/source", session))),
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close_session(&self, session: &str) -> Result<(), BrowserError> {
        self.send(
            "delete session",
            self.client.delete(self.url(&format!("/session/{}", session))),
        )
        .await?;
        Ok(())
    }
}

/// Closes the browser session when dropped, unless already closed.
///
/// Covers early returns, errors and cancellation of the owning future.
pub struct SessionGuard {
    driver: Arc<dyn BrowserDriver>,
    session: Option<String>,
}

impl SessionGuard {
    pub fn new(driver: Arc<dyn BrowserDriver>, session: String) -> Self {
        Self {
            driver,
            session: Some(session),
        }
    }

    /// Open a session on a detached task and guard it.
    ///
    /// If the caller is dropped while the session is still being created,
    /// the detached task closes the session as soon as it arrives.
    pub async fn open(driver: Arc<dyn BrowserDriver>) -> Result<Self, BrowserError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let opener = Arc::clone(&driver);
        tokio::spawn(async move {
            let opened = opener.open_session().await;
            if let Err(Ok(session)) = tx.send(opened) {
                tracing::debug!(session = %session, "Session opened after caller left; closing it");
                if let Err(e) = opener.close_session(&session).await {
                    tracing::warn!(session = %session, error = %e, "Failed to close browser session");
                }
            }
        });
        let session = rx
            .await
            .map_err(|_| BrowserError::Transport("session opener stopped unexpectedly".to_string()))??;
        tracing::debug!(session = %session, "Browser session opened");
        Ok(Self::new(driver, session))
    }

    pub fn id(&self) -> &str {
        self.session.as_deref().unwrap_or_default()
    }

    /// Close now and wait for the driver to confirm.
    pub async fn close(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.driver.close_session(&session).await {
                tracing::warn!(session = %session, error = %e, "Failed to close browser session");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::debug!(session = %session, "Closing browser session from drop guard");
        let driver = Arc::clone(&self.driver);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = driver.close_session(&session).await {
                    tracing::warn!(session = %session, error = %e, "Failed to close browser session");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_reference_parsing() {
        let value = json!({ ELEMENT_KEY: "abc-123" });
        assert_eq!(element_from(&value), Some(ElementId("abc-123".to_string())));
        assert_eq!(element_from(&json!({"other": "x"})), None);
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = WebDriverClient::new("http://localhost:9515/");
        assert_eq!(client.url("/session"), "http://localhost:9515/session");
    }
}
