//! Shared infrastructure for Cairn services:
//! - Telemetry initialization
//! - Request ID middleware

#[cfg(feature = "middleware")]
pub mod middleware;

pub mod telemetry;

#[cfg(feature = "middleware")]
pub use middleware::{get_request_id, request_id_middleware, RequestId, REQUEST_ID_HEADER};

pub use telemetry::{init_telemetry, LogFormat};
