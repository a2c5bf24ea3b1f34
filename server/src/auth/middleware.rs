//! Bearer token authentication.
//!
//! When `AUTH_SECRET` is configured every request must carry it as a
//! bearer token. Without it the server runs open, for local development.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    /// Presented the configured secret
    Token,
    /// No secret configured
    Anonymous,
}

impl AuthUser {
    fn authenticate(header: Option<&str>, secret: Option<&str>) -> Result<Self, AppError> {
        let Some(secret) = secret else {
            return Ok(AuthUser::Anonymous);
        };

        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        if token.is_empty() || token != secret {
            tracing::debug!("rejected bearer token");
            return Err(AppError::Unauthorized);
        }
        Ok(AuthUser::Token)
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        Self::authenticate(header, state.config.auth_secret.as_deref())
    }
}
