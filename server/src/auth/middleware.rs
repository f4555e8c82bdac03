//! Authentication middleware.
//!
//! Bearer token extraction. When `AUTH_TOKEN` is configured the header must
//! carry exactly that token; otherwise every request is anonymous.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Caller identity extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    Anonymous,
    Token(String),
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let Some(expected) = state.config.auth_token.as_deref() else {
            return Ok(AuthUser::Anonymous);
        };

        match auth_header.and_then(|header| header.strip_prefix("Bearer ")) {
            Some(token) if token == expected => Ok(AuthUser::Token(token.to_string())),
            Some(_) => {
                tracing::debug!("rejected bearer token");
                Err(AppError::Unauthorized)
            }
            None => Err(AppError::Unauthorized),
        }
    }
}
