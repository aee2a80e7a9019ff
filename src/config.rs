//! Configuration management for the APE agent.
//!
//! Configuration can be set via environment variables:
//! - `GOOGLE_API_KEY` - Required. Credential for the Gemini API.
//! - `GEMINI_MODEL` - Optional. Model used for routing and inference. Defaults to `gemini-2.5-flash`.
//! - `GEMINI_BASE_URL` - Optional. Defaults to `https://generativelanguage.googleapis.com/v1beta`.
//! - `HOST` - Optional. Server bind host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `AGENT_URL` - Optional. Public URL advertised in the agent card. Defaults to `http://localhost:{PORT}/`.
//! - `MEMORY_FILE` - Optional. JSON file backing the memory store. Defaults to `agent_memory.json`.
//! - `WEBDRIVER_URL` - Optional. WebDriver endpoint. Defaults to `http://localhost:9515`.
//! - `TICTACTOE_URL` - Optional. Game page used when a request names none. Defaults to `https://playtictactoe.org/`.
//! - `HANDLER_TIMEOUT_SECS` - Optional. Timeout for external calls. Defaults to `30`.
//! - `CODE_INTERPRETER` - Optional. Interpreter for generated code. Defaults to `python3`.
//! - `CODE_SANDBOX_WRAPPER` - Optional. Command prefix isolating the interpreter (e.g. `nsjail ... --`).
//!   Replaces the default bubblewrap sandbox.
//! - `CODE_SANDBOX_DISABLE` - Optional. Set to `1` to run generated code without namespace
//!   isolation (rlimits and an empty environment only). Use only where bwrap cannot run.
//! - `CODE_TIMEOUT_SECS` - Optional. Wall-clock limit for generated code. Defaults to `10`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// How generated programs are isolated from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxIsolation {
    /// bubblewrap with every namespace unshared; only the scratch directory is writable
    Bubblewrap,

    /// Operator-supplied wrapper argv the interpreter is launched through
    Wrapper(Vec<String>),

    /// No namespace isolation. Explicit opt-out only.
    Disabled,
}

/// Settings for the generated-code sandbox.
#[derive(Debug, Clone)]
pub struct CodeSandboxConfig {
    /// Interpreter binary the generated program is fed to
    pub interpreter: String,

    /// Extra interpreter arguments placed before the script path
    pub interpreter_args: Vec<String>,

    pub isolation: SandboxIsolation,

    /// Wall-clock limit for one program
    pub timeout: Duration,

    /// CPU seconds (RLIMIT_CPU)
    pub cpu_limit_secs: u64,

    /// Address-space limit in bytes (RLIMIT_AS)
    pub memory_limit_bytes: u64,
}

impl Default for CodeSandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            // -I: isolated mode (no user site, no env vars, no cwd on sys.path)
            interpreter_args: vec!["-I".to_string()],
            isolation: SandboxIsolation::Bubblewrap,
            timeout: Duration::from_secs(10),
            cpu_limit_secs: 10,
            memory_limit_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Google AI Studio API key
    pub api_key: String,

    /// Gemini model identifier
    pub model: String,

    /// Gemini REST base URL
    pub llm_base_url: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// URL advertised in the agent card
    pub agent_url: String,

    /// JSON file backing the memory store
    pub memory_file: PathBuf,

    /// WebDriver endpoint used by the tic-tac-toe bot
    pub webdriver_url: String,

    /// Game page used when the request does not name one
    pub tictactoe_url: String,

    /// Default bound for external calls (classification, inference, storage)
    pub handler_timeout: Duration,

    /// Generated-code sandbox settings
    pub code: CodeSandboxConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `GOOGLE_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GOOGLE_API_KEY".to_string()))?;

        let model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());

        let llm_base_url = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let agent_url = std::env::var("AGENT_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("http://localhost:{}/", port));
        url::Url::parse(&agent_url)
            .map_err(|e| ConfigError::InvalidValue("AGENT_URL".to_string(), format!("{}", e)))?;

        let memory_file = std::env::var("MEMORY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("agent_memory.json"));

        let webdriver_url =
            std::env::var("WEBDRIVER_URL").unwrap_or_else(|_| "http://localhost:9515".to_string());

        let tictactoe_url = std::env::var("TICTACTOE_URL")
            .unwrap_or_else(|_| "https://playtictactoe.org/".to_string());

        let handler_timeout = Duration::from_secs(parse_secs("HANDLER_TIMEOUT_SECS", 30)?);

        let mut code = CodeSandboxConfig::default();
        if let Ok(interpreter) = std::env::var("CODE_INTERPRETER") {
            let mut argv = interpreter.split_whitespace().map(str::to_string);
            if let Some(bin) = argv.next() {
                code.interpreter = bin;
                code.interpreter_args = argv.collect();
            }
        }
        let wrapper: Vec<String> = std::env::var("CODE_SANDBOX_WRAPPER")
            .map(|w| w.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        if !wrapper.is_empty() {
            code.isolation = SandboxIsolation::Wrapper(wrapper);
        } else if parse_flag("CODE_SANDBOX_DISABLE") {
            tracing::warn!("CODE_SANDBOX_DISABLE is set; generated code runs without namespace isolation");
            code.isolation = SandboxIsolation::Disabled;
        }
        code.timeout = Duration::from_secs(parse_secs("CODE_TIMEOUT_SECS", 10)?);
        code.cpu_limit_secs = code.timeout.as_secs().max(1);

        Ok(Self {
            api_key,
            model,
            llm_base_url,
            host,
            port,
            agent_url,
            memory_file,
            webdriver_url,
            tictactoe_url,
            handler_timeout,
            code,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, memory_file: PathBuf) -> Self {
        Self {
            api_key,
            model: "gemini-2.5-flash".to_string(),
            llm_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            agent_url: "http://localhost:8000/".to_string(),
            memory_file,
            webdriver_url: "http://localhost:9515".to_string(),
            tictactoe_url: "https://playtictactoe.org/".to_string(),
            handler_timeout: Duration::from_secs(30),
            code: CodeSandboxConfig::default(),
        }
    }
}

fn parse_flag(var: &str) -> bool {
    std::env::var(var)
        .map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
        })
        .unwrap_or(false)
}

fn parse_secs(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), format!("{}", e)))
            .and_then(|secs| {
                if secs == 0 {
                    Err(ConfigError::InvalidValue(
                        var.to_string(),
                        "must be greater than zero".to_string(),
                    ))
                } else {
                    Ok(secs)
                }
            }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_for_tests() {
        let config = Config::new("key".to_string(), PathBuf::from("mem.json"));
        assert_eq!(config.port, 8000);
        assert_eq!(config.handler_timeout, Duration::from_secs(30));
        assert_eq!(config.code.interpreter, "python3");
        assert_eq!(config.code.isolation, SandboxIsolation::Bubblewrap);
    }

    #[test]
    fn test_unset_flag_is_false() {
        assert!(!parse_flag("APE_AGENT_TEST_UNSET_FLAG"));
    }

    #[test]
    fn test_parse_secs_falls_back_to_default() {
        let secs = parse_secs("APE_AGENT_TEST_UNSET_TIMEOUT", 42).expect("default");
        assert_eq!(secs, 42);
    }
}
