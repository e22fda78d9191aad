//! Cairn master HTTP API
//!
//! Handlers, auth middleware and application setup for the master node.

pub mod auth;
pub mod error;
mod handlers;
pub mod setup;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
