use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Why a slug could not be turned into a download.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("File not found")]
    NotFound,

    /// Provider resolution or the upstream fetch failed.
    #[error("Link expired or invalid: {0}")]
    Gone(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "File not found").into_response(),
            Self::Gone(_) => (StatusCode::GONE, "Link expired or invalid").into_response(),
            Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
