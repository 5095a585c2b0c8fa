pub mod auth;
pub mod handler;
pub mod request;
pub mod service;

pub use service::Gateway;

use crate::config::Config;
use crate::provider::common::UpstreamClient;
use crate::provider::gitee::GiteeProvider;
use crate::provider::huggingface::HuggingFaceProvider;
use crate::provider::modelscope::ModelScopeProvider;
use crate::provider::ProviderRegistry;
use crate::storage::KvStore;
use crate::token_pool::{PoolPolicy, TokenPool};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::sync::Arc;

pub struct AppState {
    pub cfg: Config,
    pub gateway: Gateway,
}

/// 内置 provider，注册顺序即模型列表顺序。
pub fn build_registry(client: &UpstreamClient) -> ProviderRegistry {
    ProviderRegistry::builder()
        .register(Arc::new(GiteeProvider::new(client.clone())))
        .register(Arc::new(HuggingFaceProvider::new(client.clone())))
        .register(Arc::new(ModelScopeProvider::new(client.clone())))
        .build()
}

/// 按注册表为每个 provider 建立池配置：Token 来自配置，时区与匿名策略来自 adapter。
pub fn build_pool(cfg: &Config, registry: &ProviderRegistry, store: Arc<dyn KvStore>) -> TokenPool {
    registry
        .adapters()
        .iter()
        .fold(TokenPool::new(store), |pool, adapter| {
            let tokens = cfg.provider_tokens(adapter.name());
            tracing::info!(
                provider = adapter.name(),
                tokens = tokens.len(),
                anonymous = adapter.allows_anonymous(),
                "provider 已注册"
            );
            pool.with_policy(
                adapter.name(),
                PoolPolicy {
                    tokens,
                    utc_offset: adapter.quota_utc_offset(),
                    allow_anonymous: adapter.allows_anonymous(),
                },
            )
        })
}

pub fn router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/v1/models", get(handler::handle_models))
        .route("/v1/models/all", get(handler::handle_all_models))
        .route("/v1/token-stats", get(handler::handle_token_stats))
        .route("/v1/token-stats/all", get(handler::handle_all_token_stats))
        .route("/v1/token-reset", post(handler::handle_token_reset))
        // 静态路径优先于 /v1/{action}，POST 也要在这里挂上。
        .route(
            "/v1/task-status",
            get(handler::handle_task_status).post(handler::handle_action_task_status),
        )
        .route("/v1/{action}", post(handler::handle_action))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ));

    let api = Router::new()
        .route("/health", get(handler::handle_health))
        .merge(v1)
        .layer(DefaultBodyLimit::max(handler::MAX_BODY_BYTES))
        .with_state(state);

    Router::new().nest("/api", api)
}
