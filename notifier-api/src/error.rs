use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use notifier_core::NotifierError;

/// `NotifierError` rendered as `{"error": <code>, "message": <text>}`.
#[derive(Debug)]
pub struct ApiError(pub NotifierError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            NotifierError::Validation(_) => StatusCode::BAD_REQUEST,
            NotifierError::NotFound { .. } => StatusCode::NOT_FOUND,
            NotifierError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<NotifierError> for ApiError {
    fn from(error: NotifierError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), "Request failed: {}", self.0);
        }
        let body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifier_core::NotificationStatus;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(NotifierError::Validation("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(NotifierError::not_found("Notification", "x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(NotifierError::InvalidTransition {
                from: NotificationStatus::Failed,
                to: NotificationStatus::Delivered,
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(NotifierError::Transport("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
