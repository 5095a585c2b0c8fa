use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// 网关对外暴露的操作类型，路由 `/v1/{action}` 中的 action。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Generate,
    Edit,
    Text,
    Video,
    TaskStatus,
    Upscaler,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Generate,
        Action::Edit,
        Action::Text,
        Action::Video,
        Action::TaskStatus,
        Action::Upscaler,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Edit => "edit",
            Self::Text => "text",
            Self::Video => "video",
            Self::TaskStatus => "task-status",
            Self::Upscaler => "upscaler",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

/// 模型能力标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text2Image,
    Image2Image,
    Image2Video,
    Text2Text,
    Upscaler,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntRange {
    pub range: [u32; 2],
    pub default: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FloatRange {
    pub range: [f64; 2],
    pub default: f64,
}

/// Provider 声明的一个模型。构造后不可变，对外 id 为 `provider/key`。
#[derive(Debug, Clone, Serialize)]
pub struct ProviderModel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub capabilities: Vec<Capability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<IntRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<FloatRange>,

    #[serde(skip)]
    pub provider: String,
    #[serde(skip)]
    pub key: String,
    /// 上游接口使用的真实模型 ID。
    #[serde(skip)]
    pub api_id: String,
}

impl ProviderModel {
    pub fn new(provider: &str, key: &str, api_id: &str, name: &str, capability: Capability) -> Self {
        Self {
            id: format!("{provider}/{key}"),
            name: name.to_string(),
            capabilities: vec![capability],
            steps: None,
            guidance: None,
            provider: provider.to_string(),
            key: key.to_string(),
            api_id: api_id.to_string(),
        }
    }

    pub fn with_steps(mut self, min: u32, max: u32, default: u32) -> Self {
        self.steps = Some(IntRange {
            range: [min, max],
            default,
        });
        self
    }

    pub fn with_guidance(mut self, min: f64, max: f64, default: f64) -> Self {
        self.guidance = Some(FloatRange {
            range: [min, max],
            default,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_wire_names() {
        assert_eq!("task-status".parse::<Action>(), Ok(Action::TaskStatus));
        assert_eq!(" Generate ".parse::<Action>(), Ok(Action::Generate));
        assert_eq!("delete".parse::<Action>(), Err("delete".to_string()));
        for a in Action::ALL {
            assert_eq!(a.as_str().parse::<Action>(), Ok(a));
        }
    }

    #[test]
    fn model_serializes_to_listing_shape() {
        let m = ProviderModel::new("gitee", "flux-2", "FLUX.2-dev", "FLUX.2 (Gitee AI)", Capability::Text2Image)
            .with_steps(1, 50, 9)
            .with_guidance(1.0, 10.0, 3.5);
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "id": "gitee/flux-2",
                "name": "FLUX.2 (Gitee AI)",
                "type": ["text2image"],
                "steps": {"range": [1, 50], "default": 9},
                "guidance": {"range": [1.0, 10.0], "default": 3.5},
            })
        );

        let text = ProviderModel::new("gitee", "qwen-3", "Qwen3", "Qwen 3", Capability::Text2Text);
        let v = serde_json::to_value(&text).unwrap();
        assert!(v.get("steps").is_none());
        assert_eq!(v["type"], serde_json::json!(["text2text"]));
    }
}
