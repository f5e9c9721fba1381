//! 统一的 API 错误类型与转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io::ErrorKind;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::BadRequest("invalid path".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

impl From<minijinja::Error> for ApiError {
    fn from(error: minijinja::Error) -> Self {
        ApiError::Internal(format!("模板渲染失败: {error}"))
    }
}
