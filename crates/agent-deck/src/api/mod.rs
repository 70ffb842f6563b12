//! HTTP API module.
//!
//! Provides the router, REST endpoints and the shared application state.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::HealthResponse;
pub use routes::create_router;
pub use state::AppState;
