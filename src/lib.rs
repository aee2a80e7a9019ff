//! # APE Agent
//!
//! An A2A-compatible evaluation agent. Each incoming message becomes a task;
//! an LLM classifies it into one capability and the matching handler
//! produces the answer.
//!
//! This library provides:
//! - An HTTP API (plain A2A routes, JSON-RPC and SSE streaming) with an
//!   in-memory task store
//! - A dispatcher that routes requests to capability handlers
//! - Handlers for arithmetic, hashing, image labelling, a browser-driven
//!   tic-tac-toe game, sandboxed code execution and persistent memory
//!
//! ## Example
//!
//! ```rust,ignore
//! use ape_agent::{agent::Agent, agent::NoopObserver, config::Config, request::Request};
//!
//! let config = Config::from_env()?;
//! let agent = Agent::new(config);
//! let result = agent
//!     .dispatcher()
//!     .dispatch(&Request::text("What's 3 * 5?"), &NoopObserver)
//!     .await?;
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod llm;
pub mod request;
pub mod tools;

pub use config::Config;
