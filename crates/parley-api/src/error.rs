use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Error taxonomy for the REST surface. Every response body carries a
/// stable machine-readable `kind` plus a human-readable message;
/// clients branch on `kind`, never on the text.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Authentication,

    #[error("not found")]
    NotFound,

    #[error("not allowed for this resource")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("storage failure")]
    Persistence(#[from] anyhow::Error),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication_error",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Validation(_) => "validation_error",
            Self::Persistence(_) => "persistence_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Storage detail stays in the logs, not in the body.
        let message = match &self {
            Self::Persistence(inner) => {
                error!("persistence failure: {:#}", inner);
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "kind": self.kind(),
            "message": message,
        }));

        (self.status(), body).into_response()
    }
}

/// Join failures from `spawn_blocking` surface as persistence errors.
pub fn join_error(e: tokio::task::JoinError) -> ApiError {
    ApiError::Persistence(anyhow::anyhow!("blocking task failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ApiError::Authentication.kind(), "authentication_error");
        assert_eq!(ApiError::NotFound.kind(), "not_found");
        assert_eq!(ApiError::Forbidden.kind(), "forbidden");
        assert_eq!(ApiError::Validation("x".into()).kind(), "validation_error");
        assert_eq!(
            ApiError::Persistence(anyhow::anyhow!("db down")).kind(),
            "persistence_error"
        );
    }
}
