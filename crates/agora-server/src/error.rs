use agora_ai::SummaryError;
use agora_store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The database could not be reached or answered with an error.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// AI features are disabled or the purpose has no usable provider.
    #[error("AI unavailable: {0}")]
    AiUnavailable(String),

    /// Every configured provider failed.
    #[error("AI provider error: {0}")]
    AiFailed(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("Record not found".into()),
            StoreError::InvalidTransition { .. } => ServerError::Conflict(e.to_string()),
            StoreError::InvalidLink(_) => ServerError::BadRequest(e.to_string()),
            other => ServerError::Store(other),
        }
    }
}

impl From<SummaryError> for ServerError {
    fn from(e: SummaryError) -> Self {
        match e {
            SummaryError::NotConfigured(_) => ServerError::AiUnavailable(e.to_string()),
            SummaryError::AllProvidersFailed { .. } => ServerError::AiFailed(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Store(StoreError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable".to_string())
            }
            ServerError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ServerError::AiUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "AI features are not configured".to_string())
            }
            ServerError::AiFailed(_) => {
                (StatusCode::BAD_GATEWAY, "AI provider error".to_string())
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::ReminderStatus;

    #[test]
    fn store_errors_map_to_statuses() {
        let status = |e: StoreError| ServerError::from(e).into_response().status();

        assert_eq!(status(StoreError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status(StoreError::InvalidTransition {
                from: ReminderStatus::Done,
                to: ReminderStatus::Cancelled,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status(StoreError::InvalidLink("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(StoreError::Unavailable("poisoned".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(StoreError::Migration("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
