use crate::provider::{ProviderAdapter, ProviderModel};
use crate::token_pool::TokenPool;
use std::sync::Arc;

/// 不带 provider 前缀的旧式模型 ID 默认归属的 provider。
pub const LEGACY_DEFAULT_PROVIDER: &str = "gitee";

/// 拆分 `provider/model`；没有分隔符时归入默认 provider。
pub fn parse_model_id(id: &str) -> (&str, &str) {
    match id.split_once('/') {
        Some((provider, model)) => (provider, model),
        None => (LEGACY_DEFAULT_PROVIDER, id),
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl RegistryBuilder {
    /// 同名 provider 只保留先注册的一个。
    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        if self.adapters.iter().any(|a| a.name() == adapter.name()) {
            tracing::warn!(provider = adapter.name(), "provider 重复注册，已忽略");
            return self;
        }
        self.adapters.push(adapter);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            adapters: self.adapters,
        }
    }
}

/// 启动时构建、之后只读的 provider 注册表。
pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    pub fn adapters(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.adapters
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// 按注册顺序、声明顺序展开全部模型。
    pub fn all_model_configs(&self) -> Vec<ProviderModel> {
        self.adapters
            .iter()
            .flat_map(|a| a.models().iter().cloned())
            .collect()
    }

    /// 只列出当前可用的 provider 的模型。
    pub async fn all_available_model_configs(&self, pool: &TokenPool) -> Vec<ProviderModel> {
        let mut out = Vec::new();
        for adapter in &self.adapters {
            if pool.is_usable(adapter.name()).await {
                out.extend(adapter.models().iter().cloned());
            }
        }
        out
    }
}
