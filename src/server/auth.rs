//! Bearer-token check for write requests.
//!
//! With no API key configured every request passes. Otherwise GET and HEAD
//! are public and everything else needs `Authorization: Bearer <key>`.

use super::routes::{ApiError, AppState};
use crate::error::FluxError;
use crate::webhooks::signature::constant_time_eq;
use axum::extract::{Request, State};
use axum::http::{Method, header::AUTHORIZATION};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(key) = state.api_key.as_deref() else {
        return next.run(req).await;
    };

    if req.method() == Method::GET || req.method() == Method::HEAD {
        return next.run(req).await;
    }

    let authorized =
        bearer_token(&req).is_some_and(|token| constant_time_eq(token.as_bytes(), key.as_bytes()));
    if authorized {
        next.run(req).await
    } else {
        debug!(method = %req.method(), path = %req.uri().path(), "Rejected unauthorized request");
        ApiError(FluxError::unauthorized()).into_response()
    }
}
