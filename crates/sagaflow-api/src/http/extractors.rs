//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sagaflow_infra::webhook::verify_internal_key;

use super::error::AppError;
use crate::state::AppState;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

/// Guard for the `/internal` endpoints.
///
/// When `internal_key` is configured, the request must carry it in the
/// `x-internal-key` header; comparison is constant-time. With no key
/// configured the endpoints are open, which is only sensible for local
/// development.
pub struct InternalAuth;

impl FromRequestParts<AppState> for InternalAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.internal_key.as_deref() else {
            tracing::warn!("internal endpoints are unauthenticated; set internal_key");
            return Ok(Self);
        };
        let provided = parts
            .headers
            .get(INTERNAL_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(AppError::unauthorized)?;
        verify_internal_key(expected, provided).map_err(|_| AppError::unauthorized())?;
        Ok(Self)
    }
}
