use crate::storage::{KvStore, StoreError};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;

/// Upstash 风格的 REST KV：把 Redis 命令以 JSON 数组 POST 到根路径。
///
/// 请求：`["SET","k","v","EX","86400"]`
/// 响应：`{"result": ...}` 或 `{"error": "..."}`
#[derive(Debug, Clone)]
pub struct RestKvStore {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestKvStore {
    pub fn new(base_url: &str, token: &str, timeout_ms: u64) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| StoreError::backend("KV_REST_API_TOKEN 含有非法字符"))?;
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .pool_idle_timeout(Duration::from_secs(90));
        if timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }

        Ok(Self {
            http: builder.build()?,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    async fn command(&self, args: &[&str]) -> Result<Option<serde_json::Value>, StoreError> {
        let resp = self.http.post(&self.base_url).json(args).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        let parsed: Option<CommandResponse> = serde_json::from_slice(&bytes).ok();

        if !status.is_success() {
            let msg = parsed
                .and_then(|r| r.error)
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(StoreError::backend(format!("HTTP {}: {msg}", status.as_u16())));
        }

        let parsed = parsed.ok_or_else(|| StoreError::backend("REST KV 响应不是合法 JSON"))?;
        if let Some(err) = parsed.error {
            return Err(StoreError::backend(err));
        }
        Ok(parsed.result)
    }
}

#[async_trait]
impl KvStore for RestKvStore {
    fn kind(&self) -> &'static str {
        "rest"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.command(&["GET", key]).await? {
            Some(serde_json::Value::String(s)) => Ok(Some(s)),
            Some(serde_json::Value::Null) | None => Ok(None),
            // 某些实现会直接返回 JSON 对象
            Some(other) => Ok(Some(other.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1).to_string();
                self.command(&["SET", key, value, "EX", &secs]).await?;
            }
            None => {
                self.command(&["SET", key, value]).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.command(&["DEL", key]).await?;
        Ok(())
    }
}
