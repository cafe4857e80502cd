//! HTTP API over the task store and webhook subsystem.

mod auth;
mod routes;

pub use routes::{ApiError, AppState, build_router, start_server};
