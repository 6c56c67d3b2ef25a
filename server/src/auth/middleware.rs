//! Bearer token extraction.
//!
//! With `AUTH_SECRET` configured, every replication request must carry
//! `Authorization: Bearer <AUTH_SECRET>`. Without it the server accepts
//! anonymous requests and ignores any credentials sent.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    Token(String),
    Anonymous,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .filter(|token| !token.is_empty());

        let Some(secret) = &state.config.auth_secret else {
            return Ok(bearer.map_or(AuthUser::Anonymous, |t| AuthUser::Token(t.to_string())));
        };

        match bearer {
            Some(token) if token == secret.as_str() => Ok(AuthUser::Token(token.to_string())),
            Some(_) => {
                tracing::debug!("Rejected request with unknown bearer token");
                Err(AppError::Unauthorized("invalid bearer token"))
            }
            None if parts.headers.contains_key(AUTHORIZATION) => {
                Err(AppError::Unauthorized("invalid authorization header format"))
            }
            None => Err(AppError::Unauthorized("missing authorization header")),
        }
    }
}
