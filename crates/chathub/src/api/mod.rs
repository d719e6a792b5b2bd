//! HTTP API: health, conversation management and the WebSocket endpoint.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{HealthResponse, RemovalResponse};
pub use routes::create_router;
pub use state::AppState;
