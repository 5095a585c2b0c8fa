//! 键值存储（KeyValueStore）抽象。
//!
//! Token 耗尽状态与异步任务记录都只通过这里读写。后端在启动时按环境变量
//! 的优先级选定一次，之后不再切换：
//!
//! 1. REST KV（`KV_REST_API_URL` + `KV_REST_API_TOKEN`，Upstash 协议）
//! 2. Redis（`REDIS_URL`）
//! 3. 文件存储（`KV_FILE_DIR`）
//! 4. 内存存储（开发环境回退，TTL 尽力而为）

mod file;
mod memory;
mod redis;
mod rest;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use rest::RestKvStore;

use crate::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("存储后端请求失败: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Redis(#[from] ::redis::RedisError),

    #[error(transparent)]
    Json(#[from] sonic_rs::Error),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// 带 TTL 的异步键值存储。值统一为 JSON 字符串。
///
/// `ttl = None` 表示不过期。
#[async_trait]
pub trait KvStore: Send + Sync {
    /// 后端名称（仅用于日志）。
    fn kind(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// 根据配置选中的后端。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    Rest { url: String, token: String },
    Redis { url: String },
    File { dir: String },
    Memory { capacity: u64 },
}

impl BackendChoice {
    /// 按固定优先级选择，命中第一个即返回，不做合并。
    pub fn from_config(cfg: &Config) -> Self {
        let rest_url = cfg.kv_rest_api_url.trim();
        let rest_token = cfg.kv_rest_api_token.trim();
        if !rest_url.is_empty() && !rest_token.is_empty() {
            return Self::Rest {
                url: rest_url.to_string(),
                token: rest_token.to_string(),
            };
        }

        let redis_url = cfg.redis_url.trim();
        if !redis_url.is_empty() {
            return Self::Redis {
                url: redis_url.to_string(),
            };
        }

        let dir = cfg.kv_file_dir.trim();
        if !dir.is_empty() {
            return Self::File {
                dir: dir.to_string(),
            };
        }

        Self::Memory {
            capacity: cfg.memory_store_capacity,
        }
    }
}

/// 构建选中的存储后端。
pub async fn build(cfg: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match BackendChoice::from_config(cfg) {
        BackendChoice::Rest { url, token } => {
            tracing::info!("存储后端：REST KV ({url})");
            Arc::new(RestKvStore::new(&url, &token, cfg.timeout_ms).context("初始化 REST KV 失败")?)
        }
        BackendChoice::Redis { url } => {
            tracing::info!("存储后端：Redis");
            Arc::new(
                RedisStore::connect(&url)
                    .await
                    .context("连接 Redis 失败")?,
            )
        }
        BackendChoice::File { dir } => {
            tracing::info!("存储后端：文件存储 ({dir})");
            Arc::new(FileStore::new(&dir))
        }
        BackendChoice::Memory { capacity } => {
            tracing::info!("存储后端：内存存储（开发模式，重启后状态丢失）");
            Arc::new(MemoryStore::new(capacity))
        }
    };
    tracing::debug!(backend = store.kind(), "存储后端已就绪");
    Ok(store)
}
