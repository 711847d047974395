use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::management::ApiError;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Missing or out-of-range request parameter.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TelemetryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TelemetryError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TelemetryError::Upstream(_) => StatusCode::BAD_GATEWAY,
            TelemetryError::Serialization(_) => StatusCode::BAD_REQUEST,
            TelemetryError::InvalidField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TelemetryError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TelemetryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TelemetryError::NotFound(_) => StatusCode::NOT_FOUND,
            TelemetryError::Publish(_) => StatusCode::BAD_REQUEST,
            TelemetryError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TelemetryError::Unauthorized => StatusCode::UNAUTHORIZED,
            TelemetryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for TelemetryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => TelemetryError::NotFound("row".to_string()),
            other => TelemetryError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        TelemetryError::Publish(err.to_string())
    }
}

impl From<ApiError> for TelemetryError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound { kind, id } => TelemetryError::NotFound(format!("{} {}", kind, id)),
            other => TelemetryError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "message": self.to_string(),
            "type": "error",
            "code": status.as_u16(),
        }));

        if status == StatusCode::UNAUTHORIZED {
            return (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"telemetry\"")],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
