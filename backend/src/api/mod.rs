//! HTTP API module.
//!
//! This module provides the HTTP server, its wire types and the SSE progress
//! stream for the rosterload backend.

pub mod logs;
pub mod server;
pub mod types;

pub use logs::*;
pub use server::{router, start_server, AppState, SharedStore};
pub use types::*;
