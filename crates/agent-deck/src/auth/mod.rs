//! Bearer token authentication.
//!
//! A single shared token guards the API and both WebSocket endpoints. It is
//! accepted from an `Authorization: Bearer` header or, for browser WebSocket
//! upgrades that cannot set headers, a `token` query parameter. With no token
//! configured authentication is disabled.

mod config;
mod error;
mod middleware;

pub use config::AuthConfig;
pub use error::AuthError;
pub use middleware::{AuthState, require_token, require_writable};
