use crate::logging::mask_token;
use crate::storage::{KvStore, StoreError};
use crate::task::types::TaskRecord;
use crate::util::clock::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// 处理中任务的保留时长。
pub const TASK_TTL: Duration = Duration::from_secs(86_400);

/// 异步任务记录的读写。存储失败只记日志：写入丢失时，后续查询表现为任务不存在。
pub struct TaskStore {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    /// 终态记录的保留时长，`None` 表示不过期。
    result_ttl: Option<Duration>,
}

impl TaskStore {
    pub fn new(store: Arc<dyn KvStore>, result_ttl_secs: u64) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), result_ttl_secs)
    }

    pub fn with_clock(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, result_ttl_secs: u64) -> Self {
        Self {
            store,
            clock,
            result_ttl: (result_ttl_secs > 0).then(|| Duration::from_secs(result_ttl_secs)),
        }
    }

    pub async fn create(&self, task_id: &str, provider: &str, token: Option<&str>) -> TaskRecord {
        let record = TaskRecord::processing(task_id, provider, token, self.clock.now());
        self.write(&record, Some(TASK_TTL)).await;
        tracing::info!(
            task_id,
            provider,
            token = %token.map(mask_token).unwrap_or_default(),
            "异步任务已创建"
        );
        record
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        match self.read(task_id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "读取任务记录失败");
                None
            }
        }
    }

    async fn read(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let Some(raw) = self.store.get(task_id).await? else {
            return Ok(None);
        };
        Ok(Some(sonic_rs::from_str(&raw)?))
    }

    pub async fn complete(&self, record: &TaskRecord, url: &str) -> TaskRecord {
        let done = record.succeeded(url, self.clock.now());
        self.write(&done, self.result_ttl).await;
        done
    }

    pub async fn fail(&self, record: &TaskRecord, error: &str) -> TaskRecord {
        let failed = record.failed(error, self.clock.now());
        self.write(&failed, self.result_ttl).await;
        failed
    }

    async fn write(&self, record: &TaskRecord, ttl: Option<Duration>) {
        let raw = match sonic_rs::to_string(record) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(task_id = %record.id, error = %e, "任务记录序列化失败");
                return;
            }
        };
        if let Err(e) = self.store.set(&record.id, &raw, ttl).await {
            tracing::warn!(task_id = %record.id, error = %e, "写入任务记录失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::task::TaskStatus;
    use crate::util::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn task_store(result_ttl_secs: u64) -> (TaskStore, Arc<MemoryStore>) {
        let mem = Arc::new(MemoryStore::new(100));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        ));
        (TaskStore::with_clock(mem.clone(), clock, result_ttl_secs), mem)
    }

    #[tokio::test]
    async fn created_task_is_processing_with_token() {
        let (tasks, mem) = task_store(86_400);
        tasks.create("t1", "gitee", Some("tok")).await;

        let got = tasks.get("t1").await.unwrap();
        assert_eq!(got.status, TaskStatus::Processing);
        assert_eq!(got.token.as_deref(), Some("tok"));
        assert!(got.created_at.is_some());

        let raw = mem.get("t1").await.unwrap().unwrap();
        assert!(raw.contains(r#""status":"processing""#));
    }

    #[tokio::test]
    async fn terminal_records_replace_processing_ones() {
        let (tasks, _) = task_store(0);
        let rec = tasks.create("t1", "gitee", Some("tok")).await;
        tasks.complete(&rec, "https://x/v.mp4").await;

        let got = tasks.get("t1").await.unwrap();
        assert_eq!(got.status, TaskStatus::Success);
        assert_eq!(got.url.as_deref(), Some("https://x/v.mp4"));
        assert_eq!(got.token, None);
        assert!(got.completed_at.is_some());

        let rec = tasks.create("t2", "gitee", None).await;
        tasks.fail(&rec, "boom").await;
        let got = tasks.get("t2").await.unwrap();
        assert_eq!(got.status, TaskStatus::Failed);
        assert_eq!(got.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn unknown_or_corrupt_task_is_none() {
        let (tasks, mem) = task_store(86_400);
        assert!(tasks.get("missing").await.is_none());

        mem.set("bad", "{not json", None).await.unwrap();
        assert!(tasks.get("bad").await.is_none());
    }
}
