//! 统一的 API 错误类型与转换。

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::imaging::TransformError;
use crate::modify::ModifyError;
use crate::storage::StorageError;
use crate::users::UserStoreError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    InvalidType(String),
    InvalidContent(String),
    Conflict(String),
    NotFound(String),
    InvalidParameter(String),
    OutOfRange(String),
    Unauthorized(String),
    TooManyRequests(u64),
    Internal(String),
}

/// JSON 响应体 `{"message": ...}`。
#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::InvalidType(_)
            | ApiError::InvalidContent(_)
            | ApiError::InvalidParameter(_)
            | ApiError::OutOfRange(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 面向用户的提示文本；内部错误只记录日志，不回显细节。
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::InvalidType(msg)
            | ApiError::InvalidContent(msg)
            | ApiError::Conflict(msg)
            | ApiError::NotFound(msg)
            | ApiError::InvalidParameter(msg)
            | ApiError::OutOfRange(msg)
            | ApiError::Unauthorized(msg) => msg.clone(),
            ApiError::TooManyRequests(retry_after) => {
                format!("Too many login attempts, retry in {retry_after} seconds")
            }
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        match &self {
            ApiError::Internal(detail) => error!(error = %detail, "internal error"),
            ApiError::TooManyRequests(retry_after) => {
                if *retry_after > 0
                    && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
                {
                    headers.insert(header::RETRY_AFTER, value);
                }
            }
            _ => {}
        }
        let body = MessageBody {
            message: self.message(),
        };
        (self.status(), headers, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidKey => ApiError::BadRequest("Invalid filename".into()),
            StorageError::UnsupportedType => ApiError::InvalidType("Invalid file type".into()),
            StorageError::InvalidImage => ApiError::InvalidContent("Invalid image file".into()),
            StorageError::AlreadyExists(_) => ApiError::Conflict("File already exists".into()),
            StorageError::NotFound(name) => {
                ApiError::NotFound(format!("The image \"{name}\" was not found"))
            }
            StorageError::Io(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TransformError> for ApiError {
    fn from(error: TransformError) -> Self {
        match error {
            TransformError::Decode(_) | TransformError::NotAnImage => {
                ApiError::InvalidContent("Invalid image file".into())
            }
            TransformError::UnsupportedFormat => ApiError::InvalidType("Invalid file type".into()),
            TransformError::Encode(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ModifyError> for ApiError {
    fn from(error: ModifyError) -> Self {
        match error {
            ModifyError::NothingRequested => ApiError::BadRequest(error.to_string()),
            ModifyError::NotANumber(_) | ModifyError::BothDimensionsRequired => {
                ApiError::InvalidParameter(error.to_string())
            }
            ModifyError::OutOfRange(_) => ApiError::OutOfRange(error.to_string()),
        }
    }
}

impl From<UserStoreError> for ApiError {
    fn from(error: UserStoreError) -> Self {
        match error {
            UserStoreError::UsernameTaken | UserStoreError::EmailTaken => {
                ApiError::Conflict(error.to_string())
            }
            UserStoreError::Hash(detail) => ApiError::Internal(detail),
            UserStoreError::Io(err) => ApiError::Internal(err.to_string()),
            UserStoreError::Corrupt(err) => ApiError::Internal(err.to_string()),
        }
    }
}
