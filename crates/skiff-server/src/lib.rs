//! # skiff-server
//!
//! HTTP command server for Skiff sandboxes.
//!
//! Every command is a JSON object tagged by `operation` and posted to
//! `/v1/commands`; every response uses the same envelope:
//!
//! ```json
//! {"kind": "success", "payload": {...}}
//! {"kind": "failure", "error": "not_found", "reason": "...", "diagnostic": "..."}
//! ```
//!
//! Deletes are two-phase: `request_delete` returns a token which the same
//! requester confirms with `POST /v1/confirmations/:token`.

pub mod config;
pub mod http;
pub mod server;
pub mod types;

pub use config::{ConfigError, ServerConfig};
pub use server::SkiffServer;
pub use types::{ApiResult, Command, ConfirmParams};
