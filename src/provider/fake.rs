//! 测试用的脚本化 provider：按顺序吐出预设结果，并记录每次调用。

use crate::provider::{
    Action, Capability, InvokeOutput, InvokeParams, ProviderAdapter, ProviderError, ProviderModel,
    supported_list,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub struct FakeAdapter {
    name: String,
    actions: Vec<Action>,
    models: Vec<ProviderModel>,
    anonymous: bool,
    token_free: Vec<Action>,
    script: Mutex<VecDeque<Result<InvokeOutput, ProviderError>>>,
    calls: Mutex<Vec<(Action, Option<String>)>>,
}

impl FakeAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            actions: Action::ALL.to_vec(),
            models: Vec::new(),
            anonymous: false,
            token_free: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, key: &str) -> Self {
        self.models.push(ProviderModel::new(
            &self.name,
            key,
            key,
            key,
            Capability::Text2Image,
        ));
        self
    }

    pub fn with_actions(mut self, actions: &[Action]) -> Self {
        self.actions = actions.to_vec();
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    pub fn token_free(mut self, action: Action) -> Self {
        self.token_free.push(action);
        self
    }

    pub fn push(&self, result: Result<InvokeOutput, ProviderError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<(Action, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_actions(&self) -> &[Action] {
        &self.actions
    }

    fn models(&self) -> &[ProviderModel] {
        &self.models
    }

    fn allows_anonymous(&self) -> bool {
        self.anonymous
    }

    fn action_uses_token(&self, action: Action) -> bool {
        !self.token_free.contains(&action)
    }

    async fn invoke(
        &self,
        action: Action,
        params: InvokeParams,
        token: Option<&str>,
    ) -> Result<InvokeOutput, ProviderError> {
        if !self.supports(action) {
            return Err(ProviderError::UnsupportedAction {
                provider: self.name.clone(),
                action: action.to_string(),
                supported: supported_list(&self.actions),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push((action, token.map(str::to_string)));

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(InvokeOutput::Completed(serde_json::json!({
                "url": format!("https://img.test/{}", params.model),
            })))
        })
    }
}
