use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    pub details: Option<JsonValue>,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Validation(String),
    Conflict(String, Option<JsonValue>),
    Database(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    fn to_error_response(
        kind: &'static str,
        message: String,
        details: Option<JsonValue>,
    ) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            success: false,
            error: ErrorObject {
                kind,
                message,
                details,
            },
        })
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(msg) => ApiError::NotFound(msg),
            RepoError::Conflict { message, details } => ApiError::Conflict(message, details),
            RepoError::Validation(msg) => ApiError::Validation(msg),
            RepoError::Database(msg) => ApiError::Database(msg),
        }
    }
}

impl From<crate::ids::IdError> for ApiError {
    fn from(e: crate::ids::IdError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<crate::contact::ContactError> for ApiError {
    fn from(e: crate::contact::ContactError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ApiError::to_error_response("NotFound", msg, None),
            )
                .into_response(),
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::to_error_response("ValidationError", msg, None),
            )
                .into_response(),
            ApiError::Conflict(msg, details) => (
                StatusCode::CONFLICT,
                ApiError::to_error_response("ConflictError", msg, details),
            )
                .into_response(),
            ApiError::Database(msg) => {
                tracing::error!(detail = %msg, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::to_error_response(
                        "DatabaseError",
                        "database operation failed".into(),
                        None,
                    ),
                )
                    .into_response()
            }
        }
    }
}
