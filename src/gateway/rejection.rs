use std::convert::Infallible;

use warp::http::StatusCode;
use warp::{Rejection, Reply};

/// Failures while reading a JSON request body.
#[derive(Debug, thiserror::Error)]
pub enum BodyRejection {
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("expected a JSON body, got content type {0:?}")]
    NotJson(String),
    #[error("failed to read request body: {0}")]
    Unreadable(String),
    #[error("invalid request body: {0}")]
    Malformed(String),
}

impl warp::reject::Reject for BodyRejection {}

/// Maps warp's own rejections (unknown route, wrong method, bad body) onto the
/// gateway's `{error, code}` JSON shape.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, code, message): (StatusCode, &str, String) =
        if let Some(e) = err.find::<BodyRejection>() {
            match e {
                BodyRejection::TooLarge(_) => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", e.to_string())
                }
                BodyRejection::NotJson(_) => (
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    "unsupported_media_type",
                    e.to_string(),
                ),
                BodyRejection::Unreadable(_) | BodyRejection::Malformed(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_input", e.to_string())
                }
            }
        } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
            (
                StatusCode::BAD_REQUEST,
                "invalid_input",
                format!("Invalid query parameters: {e}"),
            )
        } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
            (
                StatusCode::METHOD_NOT_ALLOWED,
                "method_not_allowed",
                "Method not allowed".into(),
            )
        } else if err.is_not_found() {
            (StatusCode::NOT_FOUND, "not_found", "Not found".into())
        } else {
            tracing::error!("Unhandled rejection: {:?}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error".into(),
            )
        };

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "error": message,
            "code": code,
        })),
        status,
    ))
}
