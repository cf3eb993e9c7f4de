use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::broker::topic::TopicError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("too many connections")]
    TooBusy,
    #[error("log relay unavailable: {0}")]
    RelayUnavailable(String),
    #[error("invalid log scope: {0}")]
    InvalidScope(#[from] TopicError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooBusy | Self::RelayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidScope(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TooBusy | Self::RelayUnavailable(_))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "status": status.as_u16(),
            "message": self.to_string(),
        }));
        let mut response = (status, body).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static("5"));
        }
        response
    }
}
