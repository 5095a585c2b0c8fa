use crate::dispatch::{FailureClass, classify};
use crate::error::AppError;
use crate::logging::mask_token;
use crate::provider::ProviderError;
use crate::token_pool::TokenPool;
use std::future::Future;

/// 带 Token 轮换的调用。
///
/// 只有配额类错误会让当前 Token 被标记并换下一个，其它错误立即返回，
/// 避免一个坏请求把整池 Token 都烧掉。尝试严格串行。
pub async fn run_with_token_retry<T, F, Fut>(
    pool: &TokenPool,
    provider: &str,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let total = pool.configured_tokens(provider).len();
    if total == 0 {
        if pool.allows_anonymous(provider) {
            tracing::debug!(provider, "未配置 Token，匿名调用");
            return op(None).await.map_err(AppError::from);
        }
        return Err(AppError::TokenRequired(provider.to_string()));
    }

    let mut last_err: Option<ProviderError> = None;
    for attempt in 1..=total + 1 {
        let Some(token) = pool.next_available(provider).await else {
            return Err(AppError::TokenPoolExhausted(provider.to_string()));
        };

        let masked = mask_token(&token);
        match op(Some(token.clone())).await {
            Ok(v) => return Ok(v),
            Err(e) => match classify(&e) {
                FailureClass::Quota => {
                    tracing::warn!(
                        provider,
                        attempt,
                        token = %masked,
                        error = %e,
                        "配额错误，切换下一个 Token"
                    );
                    pool.mark_exhausted(provider, &token).await;
                    last_err = Some(e);
                }
                FailureClass::Cancelled | FailureClass::Fatal => return Err(e.into()),
            },
        }
    }

    match last_err {
        Some(e) => Err(e.into()),
        None => Err(AppError::TokenPoolExhausted(provider.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvStore, MemoryStore};
    use crate::token_pool::PoolPolicy;
    use chrono::{Offset, Utc};
    use std::sync::{Arc, Mutex};

    fn pool(tokens: &[&str], allow_anonymous: bool) -> TokenPool {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(100));
        TokenPool::new(store).with_policy(
            "p",
            PoolPolicy {
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
                utc_offset: Utc.fix(),
                allow_anonymous,
            },
        )
    }

    fn quota() -> ProviderError {
        ProviderError::http("p", 429, "too many requests")
    }

    #[tokio::test]
    async fn rotates_past_quota_failures_until_success() {
        let pool = pool(&["t1", "t2", "t3", "t4"], false);
        let seen = Mutex::new(Vec::new());

        let out = run_with_token_retry(&pool, "p", |token| {
            let token = token.unwrap_or_default();
            seen.lock().unwrap().push(token.clone());
            async move {
                if token == "t3" {
                    Ok(token)
                } else {
                    Err(quota())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(out, "t3");
        assert_eq!(*seen.lock().unwrap(), vec!["t1", "t2", "t3"]);
        let stats = pool.stats("p").await;
        assert_eq!(stats.exhausted, 2);
        assert_eq!(pool.next_available("p").await.as_deref(), Some("t3"));
    }

    #[tokio::test]
    async fn non_quota_failure_stops_immediately() {
        let pool = pool(&["t1", "t2"], false);
        let mut calls = 0;

        let err = run_with_token_retry(&pool, "p", |_| {
            calls += 1;
            async { Err::<(), _>(ProviderError::http("p", 401, "invalid token")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, AppError::Provider(ProviderError::Http { status: 401, .. })));
        assert_eq!(pool.stats("p").await.exhausted, 0);
    }

    #[tokio::test]
    async fn fully_exhausted_pool_reports_exhaustion() {
        let pool = pool(&["t1", "t2"], false);
        let mut calls = 0;

        let err = run_with_token_retry(&pool, "p", |_| {
            calls += 1;
            async { Err::<(), _>(quota()) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 2);
        assert!(matches!(err, AppError::TokenPoolExhausted(_)));
        assert_eq!(pool.next_available("p").await, None);

        // 再次调用时不会发起任何请求。
        let err = run_with_token_retry(&pool, "p", |_| {
            calls += 1;
            async { Ok::<(), ProviderError>(()) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 2);
        assert!(matches!(err, AppError::TokenPoolExhausted(_)));
    }

    #[tokio::test]
    async fn missing_tokens_require_configuration() {
        let pool = pool(&[], false);
        let mut calls = 0;
        let err = run_with_token_retry(&pool, "p", |_| {
            calls += 1;
            async { Ok::<(), ProviderError>(()) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 0);
        assert!(matches!(err, AppError::TokenRequired(_)));
    }

    #[tokio::test]
    async fn anonymous_provider_is_called_once_without_token() {
        let pool = pool(&[], true);
        let mut seen = Vec::new();
        let err = run_with_token_retry(&pool, "p", |token| {
            seen.push(token);
            async { Err::<(), _>(quota()) }
        })
        .await
        .unwrap_err();
        assert_eq!(seen, vec![None]);
        assert!(matches!(err, AppError::Provider(_)));
    }

    #[tokio::test]
    async fn cancellation_propagates_without_marking() {
        let pool = pool(&["t1", "t2"], false);
        let mut calls = 0;
        let err = run_with_token_retry(&pool, "p", |_| {
            calls += 1;
            async { Err::<(), _>(ProviderError::Cancelled) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, AppError::Provider(ProviderError::Cancelled)));
        assert_eq!(pool.stats("p").await.exhausted, 0);
    }
}
