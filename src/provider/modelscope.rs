use crate::provider::common::{self, UpstreamClient, optimize_messages};
use crate::provider::huggingface::QWEN_IMAGE_EDIT_SPACE;
use crate::provider::{
    Action, Capability, ImageInput, InvokeOutput, InvokeParams, ProviderAdapter, ProviderError,
    ProviderModel, supported_list,
};
use crate::util::id::random_seed;
use async_trait::async_trait;
use chrono::FixedOffset;
use serde_json::{Value, json};

pub const NAME: &str = "modelscope";

const GENERATE_URL: &str = "https://api-inference.modelscope.cn/v1/images/generations";
const CHAT_URL: &str = "https://api-inference.modelscope.cn/v1/chat/completions";

const ACTIONS: [Action; 3] = [Action::Generate, Action::Edit, Action::Text];

/// 魔搭社区 API-Inference。必须配置 Token，额度按北京时间每日重置。
pub struct ModelScopeProvider {
    client: UpstreamClient,
    models: Vec<ProviderModel>,
}

fn models() -> Vec<ProviderModel> {
    use Capability::*;
    let m = |key: &str, api: &str, name: &str, cap| ProviderModel::new(NAME, key, api, name, cap);
    vec![
        m("z-image-turbo", "Tongyi-MAI/Z-Image-Turbo", "Z-Image Turbo (Model Scope)", Text2Image)
            .with_steps(1, 20, 9),
        m("flux-2", "black-forest-labs/FLUX.2-dev", "FLUX.2 (Model Scope)", Text2Image)
            .with_steps(1, 50, 9)
            .with_guidance(1.0, 10.0, 3.5),
        m("flux-1-krea", "black-forest-labs/FLUX.1-Krea-dev", "FLUX.1 Krea (Model Scope)", Text2Image)
            .with_steps(1, 50, 9)
            .with_guidance(1.0, 10.0, 3.5),
        m("flux-1", "MusePublic/489_ckpt_FLUX_1", "FLUX.1 (Model Scope)", Text2Image)
            .with_steps(1, 50, 9)
            .with_guidance(1.0, 10.0, 3.5),
        m("qwen-image-edit", "Qwen/Qwen-Image-Edit-2509", "Qwen Image Edit (Model Scope)", Image2Image)
            .with_steps(1, 20, 16)
            .with_guidance(1.0, 10.0, 4.0),
        m("deepseek-v3", "deepseek-ai/DeepSeek-V3.2", "DeepSeek V3.2 (Model Scope)", Text2Text),
        m("qwen-3", "Qwen/Qwen3-Next-80B-A3B-Instruct", "Qwen 3 (Model Scope)", Text2Text),
    ]
}

fn first_image_url(data: &Value) -> Result<String, ProviderError> {
    data.pointer("/images/0/url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::invalid_response(NAME, "响应中没有图片地址"))
}

impl ModelScopeProvider {
    pub fn new(client: UpstreamClient) -> Self {
        Self {
            client,
            models: models(),
        }
    }

    async fn generate(&self, p: &InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        let prompt = p.require_str("prompt")?;
        let (width, height) = common::dimensions(p.str("ar").unwrap_or("1:1"), p.bool("hd").unwrap_or(true), None);
        let seed = p.u64("seed").unwrap_or_else(random_seed);
        let steps = p.u64("steps").unwrap_or(9);
        let guidance = p.f64("guidance");

        let mut body = json!({
            "prompt": prompt,
            "model": self.api_model_id(&p.model),
            "size": format!("{width}x{height}"),
            "seed": seed,
            "steps": steps,
        });
        if let Some(g) = guidance {
            body["guidance"] = json!(g);
        }

        let data = self.client.post_json(NAME, GENERATE_URL, token, &body).await?;
        Ok(InvokeOutput::Completed(json!({
            "url": first_image_url(&data)?,
            "width": width,
            "height": height,
            "seed": seed,
            "steps": steps,
            "guidance": guidance,
        })))
    }

    /// 魔搭只接受图片 URL：上传的文件先中转到 Gradio Space 换成公开地址。
    async fn image_urls(&self, images: Vec<ImageInput>) -> Result<Vec<String>, ProviderError> {
        let mut urls = Vec::with_capacity(images.len());
        for image in images {
            let url = match image {
                ImageInput::Url(url) => url,
                ImageInput::Bytes {
                    data,
                    file_name,
                    content_type,
                } => {
                    let path = self
                        .client
                        .gradio_upload(NAME, QWEN_IMAGE_EDIT_SPACE, None, data, &file_name, &content_type)
                        .await?;
                    format!("{QWEN_IMAGE_EDIT_SPACE}/gradio_api/file={path}")
                }
            };
            urls.push(url);
        }
        Ok(urls)
    }

    async fn edit(&self, p: InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        if p.images.is_empty() {
            return Err(ProviderError::invalid_params("image 参数不能为空"));
        }
        let prompt = p.require_str("prompt")?.to_string();
        let api_model = self.api_model_id(&p.model).to_string();
        let seed = p.u64("seed").unwrap_or_else(random_seed);
        let steps = p.u64("steps").unwrap_or(16);
        let guidance = p.f64("guidance").unwrap_or(4.0);
        let image_urls = self.image_urls(p.images).await?;

        let body = json!({
            "prompt": prompt,
            "model": api_model,
            "image_url": image_urls,
            "seed": seed,
            "steps": steps,
            "guidance": guidance,
        });
        let data = self.client.post_json(NAME, GENERATE_URL, token, &body).await?;
        Ok(InvokeOutput::Completed(json!({
            "url": first_image_url(&data)?,
            "seed": seed,
            "steps": steps,
            "guidance": guidance,
        })))
    }

    async fn text(&self, p: &InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        let prompt = p.require_str("prompt")?;
        let body = json!({
            "model": self.api_model_id(&p.model),
            "messages": optimize_messages(prompt),
            "stream": false,
        });
        let data = self.client.post_json(NAME, CHAT_URL, token, &body).await?;
        Ok(InvokeOutput::Completed(json!({
            "text": common::chat_text(&data, prompt),
        })))
    }
}

#[async_trait]
impl ProviderAdapter for ModelScopeProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_actions(&self) -> &[Action] {
        &ACTIONS
    }

    fn models(&self) -> &[ProviderModel] {
        &self.models
    }

    fn quota_utc_offset(&self) -> FixedOffset {
        super::utc_plus_8()
    }

    async fn invoke(
        &self,
        action: Action,
        params: InvokeParams,
        token: Option<&str>,
    ) -> Result<InvokeOutput, ProviderError> {
        match action {
            Action::Generate => self.generate(&params, token).await,
            Action::Edit => self.edit(params, token).await,
            Action::Text => self.text(&params, token).await,
            other => Err(ProviderError::UnsupportedAction {
                provider: NAME.to_string(),
                action: other.to_string(),
                supported: supported_list(&ACTIONS),
            }),
        }
    }
}
