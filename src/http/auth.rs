use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use super::AppState;
use crate::error::AppError;

/// Compares the configured header verbatim against the configured API
/// key. Deliberately returns the same 404 as "record not found" rather
/// than 401, to avoid hinting at the existence of the private surface.
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let supplied = req
        .headers()
        .get(state.config.api_key_name.as_str())
        .and_then(|value| value.to_str().ok());

    let authorized = match supplied {
        Some(value) => bool::from(value.as_bytes().ct_eq(state.config.api_key.as_bytes())),
        None => false,
    };

    if !authorized {
        return Err(AppError::AuthFailed);
    }

    Ok(next.run(req).await)
}
