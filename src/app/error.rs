use serde::Serialize;
use thiserror::Error;
use warp::http::StatusCode;

/// Failures surfaced by the gateway. Component code builds `anyhow` chains
/// and converts them at its boundary so the full context reaches the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{0}")]
    ClientInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0} is busy, try again later")]
    Busy(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("extraction failed: {0}")]
    Extract(String),
    #[error("filesystem error: {0}")]
    Filesystem(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl GatewayError {
    pub fn download(err: anyhow::Error) -> Self {
        Self::Download(format!("{err:#}"))
    }

    pub fn extract(err: anyhow::Error) -> Self {
        Self::Extract(format!("{err:#}"))
    }

    pub fn filesystem(err: anyhow::Error) -> Self {
        Self::Filesystem(format!("{err:#}"))
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ClientInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Busy(_) => StatusCode::CONFLICT,
            GatewayError::Download(_)
            | GatewayError::Extract(_)
            | GatewayError::Filesystem(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::ClientInput(_) => "invalid_input",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Busy(_) => "busy",
            GatewayError::Download(_) => "download_failed",
            GatewayError::Extract(_) => "extract_failed",
            GatewayError::Filesystem(_) => "filesystem_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            code: self.code(),
        }
    }
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(err: tokio::task::JoinError) -> Self {
        GatewayError::Internal(format!("background task failed: {err}"))
    }
}
