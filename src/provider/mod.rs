pub mod common;
pub mod gitee;
pub mod huggingface;
pub mod model;
pub mod modelscope;
pub mod registry;

#[cfg(test)]
pub mod fake;

pub use model::{Action, Capability, FloatRange, IntRange, ProviderModel};
pub use registry::{LEGACY_DEFAULT_PROVIDER, ProviderRegistry, RegistryBuilder};

use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// 上游返回的非 2xx 响应。`code` 为上游 JSON 中的结构化错误码（如有）。
    #[error("{provider} 上游错误 {status}: {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("{provider} 返回了无法识别的响应: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("{0}")]
    InvalidParams(String),

    #[error("{provider} 不支持操作 '{action}'，可用操作: {supported}")]
    UnsupportedAction {
        provider: String,
        action: String,
        supported: String,
    },

    /// 调用方主动放弃时使用。客户端断开时 axum 直接丢弃 handler future，不会构造此错误。
    #[error("请求已被取消")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn http(provider: &str, status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            provider: provider.to_string(),
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn invalid_response(provider: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// 编辑类操作的输入图片：URL（含 data URI）或客户端上传的原始字节。
#[derive(Debug, Clone, PartialEq)]
pub enum ImageInput {
    Url(String),
    Bytes {
        data: Vec<u8>,
        file_name: String,
        content_type: String,
    },
}

/// 一次调用的参数。`model` 为去掉 provider 前缀后的模型 key。
#[derive(Debug, Clone, Default)]
pub struct InvokeParams {
    pub model: String,
    pub body: Map<String, Value>,
    pub images: Vec<ImageInput>,
}

impl InvokeParams {
    /// 非空字符串参数。
    pub fn str(&self, key: &str) -> Option<&str> {
        self.body
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn require_str(&self, key: &str) -> Result<&str, ProviderError> {
        self.str(key)
            .ok_or_else(|| ProviderError::invalid_params(format!("缺少参数: {key}")))
    }

    /// 数字参数；multipart 表单里的数字以字符串形式到达，这里一并接受。
    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.body.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        match self.body.get(key)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.body.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskPoll {
    Processing,
    Succeeded { url: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutput {
    /// 同步结果，原样返回给客户端。
    Completed(Value),
    /// 上游已受理的异步任务，`predict` 为预计耗时（秒）。
    Pending { task_id: String, predict: u64 },
    /// `task-status` 的轮询结果。
    Task(TaskPoll),
}

/// 上游 AI 平台适配器。实现方只负责协议转换，Token 的选择与重试由调度层完成。
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn supported_actions(&self) -> &[Action];

    fn models(&self) -> &[ProviderModel];

    /// 未配置 Token 时是否允许匿名调用。
    fn allows_anonymous(&self) -> bool {
        false
    }

    /// 配额日所在时区。
    fn quota_utc_offset(&self) -> FixedOffset {
        Utc.fix()
    }

    /// 该操作是否需要（以及会消耗）上游 Token。
    fn action_uses_token(&self, _action: Action) -> bool {
        true
    }

    fn supports(&self, action: Action) -> bool {
        self.supported_actions().contains(&action)
    }

    fn find_model(&self, key: &str) -> Option<&ProviderModel> {
        self.models().iter().find(|m| m.key == key)
    }

    /// 上游使用的真实模型 ID；未声明的模型原样透传。
    fn api_model_id<'a>(&'a self, key: &'a str) -> &'a str {
        self.find_model(key).map(|m| m.api_id.as_str()).unwrap_or(key)
    }

    async fn invoke(
        &self,
        action: Action,
        params: InvokeParams,
        token: Option<&str>,
    ) -> Result<InvokeOutput, ProviderError>;
}

/// 北京时间，国内平台的额度按这个时区的自然日重置。
pub fn utc_plus_8() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix())
}

pub fn supported_list(actions: &[Action]) -> String {
    actions
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(body: Value) -> InvokeParams {
        InvokeParams {
            model: "m".to_string(),
            body: body.as_object().cloned().unwrap_or_default(),
            images: Vec::new(),
        }
    }

    #[test]
    fn params_accept_numbers_sent_as_strings() {
        let p = params(json!({"steps": "12", "guidance": 3.5, "hd": "true", "prompt": "  "}));
        assert_eq!(p.u64("steps"), Some(12));
        assert_eq!(p.f64("guidance"), Some(3.5));
        assert_eq!(p.bool("hd"), Some(true));
        assert_eq!(p.str("prompt"), None);
        assert!(matches!(
            p.require_str("prompt"),
            Err(ProviderError::InvalidParams(_))
        ));
    }

    #[test]
    fn provider_error_exposes_http_status() {
        let e = ProviderError::http("gitee", 429, "slow down");
        assert_eq!(e.status(), Some(429));
        assert_eq!(e.to_string(), "gitee 上游错误 429: slow down");
        assert_eq!(ProviderError::Cancelled.status(), None);
    }
}
