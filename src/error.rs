use crate::dispatch::{FailureClass, classify};
use crate::provider::ProviderError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("缺少参数: {0}")]
    MissingParam(String),

    #[error("参数错误: {0}")]
    BadRequest(String),

    #[error("未知操作 '{action}'，可用操作: {supported}")]
    UnknownAction { action: String, supported: String },

    #[error("未知的 provider '{name}'，可用: {valid}")]
    UnknownProvider { name: String, valid: String },

    #[error("{provider} 不支持操作 '{action}'，可用操作: {supported}")]
    UnsupportedAction {
        provider: String,
        action: String,
        supported: String,
    },

    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("{0} 需要配置 Token 才能使用")]
    TokenRequired(String),

    #[error("{0} 的所有 Token 今日额度均已耗尽")]
    TokenPoolExhausted(String),

    #[error("任务不存在或已过期: {0}")]
    TaskNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorBodyInner,
}

#[derive(Debug, Serialize)]
struct ErrorBodyInner {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
}

impl AppError {
    pub fn missing_param(name: impl Into<String>) -> Self {
        Self::MissingParam(name.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::MissingParam(_) | AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            AppError::UnknownProvider { .. } => (StatusCode::BAD_REQUEST, "invalid_provider"),
            AppError::UnsupportedAction { .. } | AppError::UnknownAction { .. } => {
                (StatusCode::BAD_REQUEST, "unsupported_action")
            }
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::TokenRequired(_) => (StatusCode::SERVICE_UNAVAILABLE, "token_required"),
            AppError::TokenPoolExhausted(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "token_exhausted")
            }
            AppError::TaskNotFound(_) => (StatusCode::NOT_FOUND, "task_not_found"),
            AppError::Provider(e) => provider_status(e),
            AppError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

fn provider_status(e: &ProviderError) -> (StatusCode, &'static str) {
    match e {
        ProviderError::InvalidParams(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        ProviderError::UnsupportedAction { .. } => (StatusCode::BAD_REQUEST, "unsupported_action"),
        // 调用方已放弃请求，状态码通常只出现在日志里。
        ProviderError::Cancelled => (
            StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            "cancelled",
        ),
        other => match classify(other) {
            FailureClass::Quota => (StatusCode::TOO_MANY_REQUESTS, "quota"),
            _ => (StatusCode::BAD_GATEWAY, "upstream"),
        },
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, ty) = self.status_and_type();
        if status.is_server_error() {
            tracing::warn!(error = %self, "请求失败");
        }

        let body = ErrorBody {
            error: ErrorBodyInner {
                message: self.to_string(),
                r#type: Some(ty.to_string()),
            },
        };

        (status, Json(body)).into_response()
    }
}
