//! Unified application error model and mapping helpers.
//! One error enum is shared by the backend routes, the credential chain at
//! startup and the client controller, with a mapper to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a protected route refused a request. The `Display` text is the wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    #[error("No token provided")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthenticated(AuthFailure),
    /// The provider refused a sign-up or sign-in (bad password, email taken).
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn missing_token() -> Self { AppError::Unauthenticated(AuthFailure::MissingToken) }
    pub fn invalid_token() -> Self { AppError::Unauthenticated(AuthFailure::InvalidToken) }
    pub fn rejected<S: Into<String>>(msg: S) -> Self { AppError::Rejected(msg.into()) }
    pub fn upstream<S: Into<String>>(msg: S) -> Self { AppError::UpstreamUnavailable(msg.into()) }
    pub fn config<S: Into<String>>(msg: S) -> Self { AppError::Configuration(msg.into()) }
    pub fn internal<S: Into<String>>(msg: S) -> Self { AppError::Internal(msg.into()) }

    pub fn code_str(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Rejected(_) => "rejected",
            AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::Configuration(_) => "configuration_error",
            AppError::Internal(_) => "internal",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Rejected(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Configuration(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.to_string() };
        (self.http_status(), Json(body)).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Internal unless mapped explicitly at the call site
        AppError::Internal(err.to_string())
    }
}
