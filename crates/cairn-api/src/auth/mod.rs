//! Bearer-token authentication for the master API.

pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::{JwtClaims, JwtVerifier};
pub use middleware::auth_middleware;
pub use models::Caller;
