use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

/// 异步任务记录，以任务 ID 为键存放在 KV 中。
///
/// `token` 只在处理中保存；终态记录写入时丢弃。时间戳为 RFC 3339（UTC，毫秒精度）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
}

impl TaskRecord {
    pub fn processing(id: &str, provider: &str, token: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Processing,
            id: id.to_string(),
            provider: provider.to_string(),
            token: token.map(str::to_string),
            url: None,
            error: None,
            created_at: Some(timestamp(now)),
            completed_at: None,
            failed_at: None,
        }
    }

    pub fn succeeded(&self, url: &str, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Success,
            id: self.id.clone(),
            provider: self.provider.clone(),
            token: None,
            url: Some(url.to_string()),
            error: None,
            created_at: None,
            completed_at: Some(timestamp(now)),
            failed_at: None,
        }
    }

    pub fn failed(&self, error: &str, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Failed,
            id: self.id.clone(),
            provider: self.provider.clone(),
            token: None,
            url: None,
            error: Some(error.to_string()),
            created_at: None,
            completed_at: None,
            failed_at: Some(timestamp(now)),
        }
    }

    /// 返回给客户端的视图，不包含 Token。
    pub fn public_view(&self) -> serde_json::Value {
        let mut v = serde_json::json!({
            "status": self.status,
            "taskId": self.id,
            "provider": self.provider,
        });
        if let Some(url) = &self.url {
            v["url"] = url.clone().into();
        }
        if let Some(error) = &self.error {
            v["error"] = error.clone().into();
        }
        v
    }
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}
