use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced to the caller of the gateway.
///
/// Upstream failures are not represented here: the facade turns those into
/// empty series or placeholder values, see [`crate::query::QueryFailure`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid time range: {0}")]
    InvalidRange(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Token error: {0}")]
    TokenIssue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<jsonwebtoken::errors::Error> for GatewayError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        GatewayError::TokenIssue(err.to_string())
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnknownMetric(_) => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidRange(_) | GatewayError::InvalidQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::TokenIssue(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }

        response
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
