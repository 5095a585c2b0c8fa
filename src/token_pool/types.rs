use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// KV 中保存的耗尽状态：`{"date":"YYYY-MM-DD","exhausted":{"token":true}}`。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStatusRecord {
    pub date: String,
    #[serde(default)]
    pub exhausted: BTreeMap<String, bool>,
}

impl TokenStatusRecord {
    pub fn fresh(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            exhausted: BTreeMap::new(),
        }
    }

    pub fn is_exhausted(&self, token: &str) -> bool {
        self.exhausted.get(token).copied().unwrap_or(false)
    }
}

/// 单个 provider 的 Token 统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenStats {
    pub total: usize,
    pub exhausted: usize,
    pub active: usize,
}

/// 单个 provider 的池配置。
#[derive(Debug, Clone)]
pub struct PoolPolicy {
    /// 配置顺序即选取顺序。
    pub tokens: Vec<String>,
    /// 上游配额重置所在时区（固定偏移）。
    pub utc_offset: FixedOffset,
    /// 未配置 Token 时是否允许匿名调用。
    pub allow_anonymous: bool,
}
