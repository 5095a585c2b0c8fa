use crate::dispatch::{FailureClass, classify, run_with_token_retry};
use crate::error::AppError;
use crate::logging::mask_token;
use crate::provider::registry::parse_model_id;
use crate::provider::{
    Action, InvokeOutput, InvokeParams, ProviderAdapter, ProviderError, ProviderModel,
    ProviderRegistry, TaskPoll, supported_list,
};
use crate::task::{TaskRecord, TaskStore};
use crate::token_pool::{TokenPool, TokenStats};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 网关的业务入口：解析模型、调度 Token、跟踪异步任务。HTTP 层只负责解析与序列化。
pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    pool: Arc<TokenPool>,
    tasks: TaskStore,
}

impl Gateway {
    pub fn new(registry: Arc<ProviderRegistry>, pool: Arc<TokenPool>, tasks: TaskStore) -> Self {
        Self {
            registry,
            pool,
            tasks,
        }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &TokenPool {
        &self.pool
    }

    fn provider(&self, name: &str) -> Result<&Arc<dyn ProviderAdapter>, AppError> {
        self.registry
            .get(name)
            .ok_or_else(|| AppError::UnknownProvider {
                name: name.to_string(),
                valid: self.registry.provider_names().join(", "),
            })
    }

    /// 执行一次 `/v1/{action}` 调用。`model_id` 为 `provider/model` 或旧式的裸模型名。
    pub async fn invoke(
        &self,
        action: Action,
        model_id: &str,
        mut params: InvokeParams,
    ) -> Result<Value, AppError> {
        let (provider_name, model_key) = parse_model_id(model_id);
        let adapter = self.provider(provider_name)?;
        if !adapter.supports(action) {
            return Err(AppError::UnsupportedAction {
                provider: adapter.name().to_string(),
                action: action.to_string(),
                supported: supported_list(adapter.supported_actions()),
            });
        }
        params.model = model_key.to_string();

        if !adapter.action_uses_token(action) {
            let out = adapter.invoke(action, params, None).await?;
            return self.finish(adapter.name(), out, None).await;
        }

        let (out, token) = run_with_token_retry(&self.pool, adapter.name(), |token| {
            let adapter = adapter.clone();
            let params = params.clone();
            async move {
                let out = adapter.invoke(action, params, token.as_deref()).await?;
                Ok::<_, ProviderError>((out, token))
            }
        })
        .await?;

        self.finish(adapter.name(), out, token).await
    }

    async fn finish(
        &self,
        provider: &str,
        out: InvokeOutput,
        token: Option<String>,
    ) -> Result<Value, AppError> {
        match out {
            InvokeOutput::Completed(v) => Ok(v),
            InvokeOutput::Pending { task_id, predict } => {
                self.tasks.create(&task_id, provider, token.as_deref()).await;
                Ok(json!({ "taskId": task_id, "predict": predict }))
            }
            InvokeOutput::Task(poll) => Ok(poll_view(&poll)),
        }
    }

    /// 查询异步任务。终态记录直接返回；处理中的任务用创建时的 Token 向上游轮询一次。
    pub async fn poll_task(&self, task_id: &str) -> Result<Value, AppError> {
        let Some(record) = self.tasks.get(task_id).await else {
            return Err(AppError::TaskNotFound(task_id.to_string()));
        };
        if record.status.is_terminal() {
            return Ok(record.public_view());
        }

        let adapter = self.provider(&record.provider)?;
        let mut params = InvokeParams::default();
        params
            .body
            .insert("taskId".to_string(), Value::String(task_id.to_string()));

        let polled = adapter
            .invoke(Action::TaskStatus, params, record.token.as_deref())
            .await;
        let updated = match polled {
            Ok(InvokeOutput::Task(TaskPoll::Processing)) => record,
            Ok(InvokeOutput::Task(TaskPoll::Succeeded { url })) => {
                self.tasks.complete(&record, &url).await
            }
            Ok(InvokeOutput::Task(TaskPoll::Failed { error })) => {
                self.tasks.fail(&record, &error).await
            }
            Ok(_) => {
                let e = ProviderError::invalid_response(&record.provider, "任务查询返回了非任务结果");
                self.fail_on_exception(&record, e).await?
            }
            Err(e) => self.fail_on_exception(&record, e).await?,
        };

        Ok(updated.public_view())
    }

    /// 轮询异常：任务记为失败；只有配额类错误才把任务绑定的 Token 标记为耗尽。
    async fn fail_on_exception(
        &self,
        record: &TaskRecord,
        err: ProviderError,
    ) -> Result<TaskRecord, AppError> {
        let class = classify(&err);
        if class == FailureClass::Cancelled {
            return Err(err.into());
        }

        tracing::warn!(
            task_id = %record.id,
            provider = %record.provider,
            error = %err,
            "任务状态查询失败"
        );
        if class == FailureClass::Quota
            && let Some(token) = record.token.as_deref()
        {
            tracing::warn!(
                provider = %record.provider,
                token = %mask_token(token),
                "任务查询遇到配额错误，标记 Token"
            );
            self.pool.mark_exhausted(&record.provider, token).await;
        }

        Ok(self.tasks.fail(record, &err.to_string()).await)
    }

    pub async fn models(&self, include_unavailable: bool) -> Vec<ProviderModel> {
        if include_unavailable {
            self.registry.all_model_configs()
        } else {
            self.registry.all_available_model_configs(&self.pool).await
        }
    }

    pub async fn token_stats(&self, provider: &str) -> Result<TokenStats, AppError> {
        let adapter = self.provider(provider)?;
        Ok(self.pool.stats(adapter.name()).await)
    }

    pub async fn all_token_stats(&self) -> BTreeMap<String, TokenStats> {
        self.pool.all_stats().await
    }

    pub async fn reset_tokens(&self, provider: &str) -> Result<(), AppError> {
        let adapter = self.provider(provider)?;
        self.pool.reset(adapter.name()).await;
        Ok(())
    }
}

fn poll_view(poll: &TaskPoll) -> Value {
    match poll {
        TaskPoll::Processing => json!({ "status": "processing" }),
        TaskPoll::Succeeded { url } => json!({ "status": "success", "url": url }),
        TaskPoll::Failed { error } => json!({ "status": "failed", "error": error }),
    }
}
