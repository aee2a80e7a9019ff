//! HTTP API: A2A task endpoints, JSON-RPC entrypoint and discovery card.
//!
//! ## Endpoints
//!
//! - `GET /.well-known/agent-card.json` - Agent card (also `/.well-known/agent.json`)
//! - `POST /message/send` - Run a message to its final state
//! - `POST /message/stream` - Run a message, streaming task events (SSE)
//! - `POST /task/get` - Poll a task by id
//! - `POST /task/cancel` - Cancel a live task
//! - `POST /` - JSON-RPC 2.0 (`message/send`, `message/stream`, `tasks/get`, `tasks/cancel`)
//! - `GET /health` - Liveness probe

pub mod a2a;
pub mod card;
pub mod jsonrpc;
mod routes;
pub mod task_runner;
pub mod task_store;
pub mod types;

pub use routes::{router, serve, AppState};
