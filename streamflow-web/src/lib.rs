//! StreamFlow Web - JSON and media streaming API server
//!
//! Exposes the streaming service under `/api/torrents` for the browser
//! player, plus a `/health` endpoint.

pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types
pub use error::ApiError;
pub use server::{AppState, build_router, run_server};
