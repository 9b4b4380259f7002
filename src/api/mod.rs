pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiJson, ApiResult};
pub use routes::create_router;
pub use state::AppState;
