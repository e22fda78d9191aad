//! Cairn Core Library
//!
//! Domain models, error types, configuration and the request context shared by
//! every Cairn crate. Nothing here performs I/O beyond reading the environment.

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod models;
pub mod role;

pub use config::{BaseConfig, Config, MasterConfig, SchedulingStrategy};
pub use context::{BearerToken, RequestContext};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::*;
pub use role::{ClusterRole, Coordinator};
