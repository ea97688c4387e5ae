use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tracing::{error, warn};

use super::AppState;
use crate::error::AppError;
use crate::identity::VerifiedClaims;

/// Token after a `Bearer ` prefix. Missing header, another scheme, or an
/// empty token all count as no token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").filter(|t| !t.is_empty())
}

/// Extractor for routes that need a verified caller.
pub struct Authenticated(pub VerifiedClaims);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Err(AppError::missing_token());
        };
        match state.verifier.verify(token).await {
            Ok(claims) => Ok(Authenticated(claims)),
            Err(AppError::Unauthenticated(reason)) => {
                warn!(path = %parts.uri.path(), "token rejected: {reason:?}");
                Err(AppError::invalid_token())
            }
            Err(e) => {
                // Key fetch trouble still reads as a bad token to the caller.
                error!(path = %parts.uri.path(), "token verification failed: {e}");
                Err(AppError::invalid_token())
            }
        }
    }
}
