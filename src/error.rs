use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Failures surfaced by the credential core.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Current password is incorrect")]
    IncorrectPassword,

    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("Invalid token")]
    InvalidToken,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) | AuthError::IncorrectPassword => StatusCode::BAD_REQUEST,
            AuthError::DuplicateEmail => StatusCode::CONFLICT,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::InvalidCredentials
            | AuthError::Unauthenticated(_)
            | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation_error",
            AuthError::DuplicateEmail => "duplicate_email",
            AuthError::NotFound(_) => "not_found",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::IncorrectPassword => "incorrect_password",
            AuthError::Unauthenticated(_) => "unauthenticated",
            AuthError::InvalidToken => "invalid_token",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            AuthError::Internal(ref e) => {
                error!(error = %e, "internal error");
                ErrorBody {
                    error: self.kind(),
                    message: "An internal server error occurred".into(),
                    details: Vec::new(),
                }
            }
            AuthError::Validation(ref violations) => ErrorBody {
                error: self.kind(),
                message: "Invalid input".into(),
                details: violations.clone(),
            },
            ref other => ErrorBody {
                error: other.kind(),
                message: other.to_string(),
                details: Vec::new(),
            },
        };
        (status, Json(body)).into_response()
    }
}
