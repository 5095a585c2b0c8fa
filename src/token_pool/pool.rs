use crate::logging::mask_token;
use crate::storage::{KvStore, StoreError};
use crate::token_pool::types::{PoolPolicy, TokenStats, TokenStatusRecord};
use crate::util::clock::{Clock, SystemClock};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

pub const TOKEN_STATUS_KEY_PREFIX: &str = "token_status_";
/// 记录写入时带 24 小时 TTL，跨日残留由存储自行淘汰。
pub const TOKEN_STATUS_TTL: Duration = Duration::from_secs(86_400);

/// 计算某时刻在给定时区下的配额日（`YYYY-MM-DD`）。
pub fn quota_day_at(offset: FixedOffset, now: DateTime<Utc>) -> String {
    now.with_timezone(&offset).format("%Y-%m-%d").to_string()
}

/// 所有 provider 共用的 Token 池。
///
/// 不持有任何锁：并发请求对同一 provider 的写入可能互相覆盖，丢失的标记
/// 会在该 Token 下次失败时重新补上。存储异常一律降级为“全部可用”。
pub struct TokenPool {
    order: Vec<String>,
    policies: HashMap<String, PoolPolicy>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl TokenPool {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            order: Vec::new(),
            policies: HashMap::new(),
            store,
            clock,
        }
    }

    /// 注册 provider 的池配置；重复注册时覆盖配置但保留原有顺序。
    pub fn with_policy(mut self, provider: &str, policy: PoolPolicy) -> Self {
        if !self.policies.contains_key(provider) {
            self.order.push(provider.to_string());
        }
        self.policies.insert(provider.to_string(), policy);
        self
    }

    pub fn configured_tokens(&self, provider: &str) -> &[String] {
        self.policies
            .get(provider)
            .map(|p| p.tokens.as_slice())
            .unwrap_or(&[])
    }

    pub fn allows_anonymous(&self, provider: &str) -> bool {
        self.policies
            .get(provider)
            .is_some_and(|p| p.allow_anonymous)
    }

    /// 当前配额日。未注册的 provider 按 UTC 计算。
    pub fn quota_day(&self, provider: &str) -> String {
        let offset = self
            .policies
            .get(provider)
            .map(|p| p.utc_offset)
            .unwrap_or_else(utc);
        quota_day_at(offset, self.clock.now())
    }

    fn key(provider: &str) -> String {
        format!("{TOKEN_STATUS_KEY_PREFIX}{provider}")
    }

    async fn read_record(&self, provider: &str) -> Result<TokenStatusRecord, StoreError> {
        let today = self.quota_day(provider);
        let Some(raw) = self.store.get(&Self::key(provider)).await? else {
            return Ok(TokenStatusRecord::fresh(today));
        };

        let record: TokenStatusRecord = match sonic_rs::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(provider, error = %e, "Token 状态记录无法解析，按空记录处理");
                return Ok(TokenStatusRecord::fresh(today));
            }
        };

        // 跨日：旧记录逻辑失效，不强制写回，等下一次标记时自然覆盖。
        if record.date != today {
            return Ok(TokenStatusRecord::fresh(today));
        }
        Ok(record)
    }

    /// 读取当前配额日的记录；存储异常时返回空记录。
    pub async fn current_record(&self, provider: &str) -> TokenStatusRecord {
        match self.read_record(provider).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(provider, error = %e, "读取 Token 状态失败，按全部可用处理");
                TokenStatusRecord::fresh(self.quota_day(provider))
            }
        }
    }

    /// 按配置顺序返回第一个未耗尽的 Token。
    pub async fn next_available(&self, provider: &str) -> Option<String> {
        let tokens = self.configured_tokens(provider);
        if tokens.is_empty() {
            return None;
        }
        let record = self.current_record(provider).await;
        tokens.iter().find(|t| !record.is_exhausted(t)).cloned()
    }

    /// 标记 Token 在当前配额日内已耗尽。
    pub async fn mark_exhausted(&self, provider: &str, token: &str) {
        // 写前重读：若期间跨日，旧记录在这里被新的一天替换。
        let mut record = self.current_record(provider).await;
        record.exhausted.insert(token.to_string(), true);
        self.write_record(provider, &record).await;

        tracing::warn!(
            provider,
            token = %mask_token(token),
            day = %record.date,
            "Token 配额耗尽，已标记"
        );
    }

    /// 清空指定 provider 当天的耗尽标记。
    pub async fn reset(&self, provider: &str) {
        let record = TokenStatusRecord::fresh(self.quota_day(provider));
        self.write_record(provider, &record).await;
        tracing::info!(provider, "已重置 Token 状态");
    }

    async fn write_record(&self, provider: &str, record: &TokenStatusRecord) {
        let value = match sonic_rs::to_string(record) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(provider, error = %e, "序列化 Token 状态失败");
                return;
            }
        };
        if let Err(e) = self
            .store
            .set(&Self::key(provider), &value, Some(TOKEN_STATUS_TTL))
            .await
        {
            tracing::warn!(provider, error = %e, "写入 Token 状态失败");
        }
    }

    pub async fn stats(&self, provider: &str) -> TokenStats {
        let tokens = self.configured_tokens(provider);
        let total = tokens.len();
        let record = match self.read_record(provider).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(provider, error = %e, "读取 Token 状态失败，统计按全部可用返回");
                return TokenStats {
                    total,
                    exhausted: 0,
                    active: total,
                };
            }
        };
        let exhausted = tokens.iter().filter(|t| record.is_exhausted(t)).count();
        TokenStats {
            total,
            exhausted,
            active: total - exhausted,
        }
    }

    pub async fn all_stats(&self) -> BTreeMap<String, TokenStats> {
        let mut out = BTreeMap::new();
        for provider in &self.order {
            out.insert(provider.clone(), self.stats(provider).await);
        }
        out
    }

    /// 该 provider 当前能否接单：支持匿名调用，或还有未耗尽的 Token。
    pub async fn is_usable(&self, provider: &str) -> bool {
        if self.allows_anonymous(provider) {
            return true;
        }
        self.next_available(provider).await.is_some()
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::util::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn beijing() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn policy(tokens: &[&str], utc_offset: FixedOffset, allow_anonymous: bool) -> PoolPolicy {
        PoolPolicy {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            utc_offset,
            allow_anonymous,
        }
    }

    fn pool_at(
        store: Arc<dyn KvStore>,
        clock: Arc<ManualClock>,
    ) -> TokenPool {
        TokenPool::with_clock(store, clock)
            .with_policy("gitee", policy(&["t1", "t2", "t3"], beijing(), false))
            .with_policy("huggingface", policy(&[], utc(), true))
    }

    /// 永远失败的存储，用于验证降级路径。
    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        fn kind(&self) -> &'static str {
            "broken"
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::backend("down"))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            Err(StoreError::backend("down"))
        }
        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::backend("down"))
        }
    }

    #[test]
    fn quota_day_depends_on_provider_timezone() {
        // 2025-03-01 17:00 UTC = 2025-03-02 01:00 北京时间
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 17, 0, 0).unwrap();
        assert_eq!(quota_day_at(utc(), now), "2025-03-01");
        assert_eq!(quota_day_at(beijing(), now), "2025-03-02");
    }

    #[tokio::test]
    async fn marking_every_token_leaves_nothing_available() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap(),
        ));
        let pool = pool_at(Arc::new(MemoryStore::default()), clock);

        assert_eq!(pool.next_available("gitee").await.as_deref(), Some("t1"));
        pool.mark_exhausted("gitee", "t1").await;
        assert_eq!(pool.next_available("gitee").await.as_deref(), Some("t2"));
        pool.mark_exhausted("gitee", "t2").await;
        pool.mark_exhausted("gitee", "t3").await;

        assert_eq!(pool.next_available("gitee").await, None);
        assert_eq!(
            pool.stats("gitee").await,
            TokenStats {
                total: 3,
                exhausted: 3,
                active: 0
            }
        );
        assert!(!pool.is_usable("gitee").await);
    }

    #[tokio::test]
    async fn exhaustion_resets_on_quota_day_rollover() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let pool = pool_at(Arc::new(MemoryStore::default()), clock.clone());

        for t in ["t1", "t2", "t3"] {
            pool.mark_exhausted("gitee", t).await;
        }
        assert_eq!(pool.next_available("gitee").await, None);

        // 北京时间次日 00:30
        clock.set(Utc.with_ymd_and_hms(2025, 3, 1, 16, 30, 0).unwrap());
        assert_eq!(pool.next_available("gitee").await.as_deref(), Some("t1"));
        assert_eq!(pool.stats("gitee").await.exhausted, 0);

        // 跨日后再标记：旧日期的条目不应残留。
        pool.mark_exhausted("gitee", "t2").await;
        let record = pool.current_record("gitee").await;
        assert_eq!(record.date, "2025-03-02");
        assert_eq!(record.exhausted.len(), 1);
        assert!(record.is_exhausted("t2"));
    }

    #[tokio::test]
    async fn record_uses_wire_format_and_key() {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let pool = pool_at(store.clone(), clock);
        pool.mark_exhausted("gitee", "t1").await;

        let raw = store.get("token_status_gitee").await.unwrap().unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"date": "2025-03-01", "exhausted": {"t1": true}})
        );
    }

    #[tokio::test]
    async fn reads_records_written_by_other_instances() {
        let store = Arc::new(MemoryStore::default());
        store
            .set(
                "token_status_gitee",
                r#"{"date":"2025-03-01","exhausted":{"t1":true,"t2":false}}"#,
                None,
            )
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let pool = pool_at(store, clock);

        assert_eq!(pool.next_available("gitee").await.as_deref(), Some("t2"));
        assert_eq!(pool.stats("gitee").await.exhausted, 1);
    }

    #[tokio::test]
    async fn garbage_record_is_treated_as_fresh() {
        let store = Arc::new(MemoryStore::default());
        store.set("token_status_gitee", "not json", None).await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let pool = pool_at(store, clock);
        assert_eq!(pool.next_available("gitee").await.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn broken_store_degrades_to_all_active() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let pool = pool_at(Arc::new(BrokenStore), clock);

        pool.mark_exhausted("gitee", "t1").await;
        assert_eq!(pool.next_available("gitee").await.as_deref(), Some("t1"));
        assert_eq!(
            pool.stats("gitee").await,
            TokenStats {
                total: 3,
                exhausted: 0,
                active: 3
            }
        );
    }

    #[tokio::test]
    async fn reset_clears_todays_marks() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let pool = pool_at(Arc::new(MemoryStore::default()), clock);
        pool.mark_exhausted("gitee", "t1").await;
        pool.reset("gitee").await;
        assert_eq!(pool.stats("gitee").await.exhausted, 0);
    }

    #[tokio::test]
    async fn anonymous_provider_without_tokens_is_usable() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let pool = pool_at(Arc::new(MemoryStore::default()), clock)
            .with_policy("modelscope", policy(&[], beijing(), false));

        assert!(pool.is_usable("huggingface").await);
        assert!(!pool.is_usable("modelscope").await);
        assert!(!pool.is_usable("unknown").await);

        let all = pool.all_stats().await;
        assert_eq!(all.len(), 3);
        assert_eq!(all["huggingface"], TokenStats::default());
    }

    #[tokio::test]
    async fn anonymous_provider_stays_usable_after_tokens_run_out() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let pool = pool_at(Arc::new(MemoryStore::default()), clock)
            .with_policy("huggingface", policy(&["h1"], utc(), true));

        pool.mark_exhausted("huggingface", "h1").await;
        assert_eq!(pool.next_available("huggingface").await, None);
        assert!(pool.is_usable("huggingface").await);
    }
}
