use crate::storage::{KvStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 文件存储：每个 key 一个 JSON 文件，过期时间写在文件内，读取时判断。
///
/// 适合单机部署需要跨重启保留状态、又没有 Redis 的场景。
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: String,
    /// 过期时间（Unix 毫秒），0 表示不过期。
    #[serde(default)]
    expires_at: i64,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // key 可能包含任意字符（任务 ID 由上游分配），统一做 URL 编码后作为文件名。
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

#[async_trait]
impl KvStore for FileStore {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        let data = match tokio::fs::read(&path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = sonic_rs::from_slice(&data)?;
        if envelope.expires_at > 0 && envelope.expires_at <= Utc::now().timestamp_millis() {
            // 惰性清理：过期文件在下次读取时删除。
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let expires_at = match ttl {
            Some(ttl) => Utc::now()
                .timestamp_millis()
                .saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64),
            None => 0,
        };
        let data = sonic_rs::to_vec(&Envelope {
            value: value.to_string(),
            expires_at,
        })?;

        // 先写临时文件再 rename，避免并发读到半截内容。
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (FileStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("imagine-kv-{}", uuid::Uuid::new_v4().simple()));
        (FileStore::new(&dir), dir)
    }

    #[tokio::test]
    async fn values_survive_a_new_store_instance() {
        let (store, dir) = temp_store();
        store
            .set("token_status_gitee", r#"{"date":"2025-01-01"}"#, None)
            .await
            .unwrap();

        let reopened = FileStore::new(&dir);
        assert_eq!(
            reopened.get("token_status_gitee").await.unwrap().as_deref(),
            Some(r#"{"date":"2025-01-01"}"#)
        );

        reopened.delete("token_status_gitee").await.unwrap();
        assert_eq!(store.get("token_status_gitee").await.unwrap(), None);
        // 重复删除不报错
        reopened.delete("token_status_gitee").await.unwrap();

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn expired_values_read_as_absent() {
        let (store, dir) = temp_store();
        store
            .set("task/with:odd?chars", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(
            store.get("task/with:odd?chars").await.unwrap().as_deref(),
            Some("v")
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("task/with:odd?chars").await.unwrap(), None);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn huge_ttl_saturates_instead_of_overflowing() {
        let (store, dir) = temp_store();
        store
            .set("task-forever", "v", Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();
        assert_eq!(store.get("task-forever").await.unwrap().as_deref(), Some("v"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
