use axum::http::StatusCode;

/// Typed failures surfaced by the computation engines.
///
/// Every engine failure carries enough context for the endpoint layer to map
/// it to a status code and for the coordinator to log-and-continue without
/// inspecting message strings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("service '{0}' not found")]
    ServiceNotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Storage(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
