//! HTTP API for the generation proxy.
//!
//! ## Endpoints
//!
//! - `POST /api/ask-ai` - Generate (or revise) a page; streams raw HTML text
//! - `GET /api/providers` - List upstream providers and their limits
//! - `GET /api/health` - Health check

mod error;
mod generate;
mod identity;
mod routes;
pub mod types;

pub use error::ApiError;
pub use generate::generate;
pub use identity::{caller_token, client_identity, Credential};
pub use routes::{router, serve, AppState};
pub use types::*;
