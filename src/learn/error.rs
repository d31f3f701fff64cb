use axum::{response::IntoResponse, Json};

use crate::backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum LearnError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not enrolled in course {0}")]
    NotEnrolled(uuid::Uuid),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Your account is pending approval.")]
    PendingApproval,
    #[error("Remote error: {0}")]
    Remote(#[from] BackendError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LearnError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl IntoResponse for LearnError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotEnrolled(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) | Self::Remote(BackendError::Unauthorized(_)) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) | Self::PendingApproval => StatusCode::FORBIDDEN,
            Self::Remote(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
