use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::ChatError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<ChatError>() {
            Some(ChatError::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(ChatError::QueueFull { .. } | ChatError::QueueClosed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Some(ChatError::NoMessages(_)) => StatusCode::NOT_FOUND,
            Some(ChatError::Storage { .. } | ChatError::Encoding(_)) | None => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self.0, "request failed");
        }

        let body = Json(json!({ "error": self.0.to_string() }));
        let retryable = self
            .0
            .downcast_ref::<ChatError>()
            .is_some_and(ChatError::is_retryable);

        if retryable {
            (status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
