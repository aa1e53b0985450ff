use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TollgateError {
    /// Returned for blocks and exhausted quotas alike.
    #[error("Too many attempts, retry after {retry_after_seconds} seconds")]
    TooManyAttempts { retry_after_seconds: u64 },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl TollgateError {
    pub fn status(&self) -> StatusCode {
        match self {
            TollgateError::TooManyAttempts { .. } => StatusCode::TOO_MANY_REQUESTS,
            TollgateError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TollgateError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for TollgateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16()
        }));

        let mut response = (status, body).into_response();
        if let TollgateError::TooManyAttempts {
            retry_after_seconds,
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_seconds));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, TollgateError>;
