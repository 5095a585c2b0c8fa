use crate::provider::common::{
    self, DEFAULT_VIDEO_PROMPT, UpstreamClient, VIDEO_NEGATIVE_PROMPT, gradio_file,
    optimize_messages,
};
use crate::provider::{
    Action, Capability, ImageInput, InvokeOutput, InvokeParams, ProviderAdapter, ProviderError,
    ProviderModel, TaskPoll,
};
use crate::util::id::random_seed;
use async_trait::async_trait;
use serde_json::{Value, json};

pub const NAME: &str = "huggingface";

const Z_IMAGE_SPACE: &str = "https://luca115-z-image-turbo.hf.space";
const QWEN_IMAGE_SPACE: &str = "https://mcp-tools-qwen-image-fast.hf.space";
const OVIS_IMAGE_SPACE: &str = "https://aidc-ai-ovis-image-7b.hf.space";
const FLUX_SCHNELL_SPACE: &str = "https://black-forest-labs-flux-1-schnell.hf.space";
pub const QWEN_IMAGE_EDIT_SPACE: &str = "https://linoyts-qwen-image-edit-2509-fast.hf.space";
const WAN2_VIDEO_SPACE: &str = "https://fradeck619-wan2-2-fp8da-aoti-faster.hf.space";
const UPSCALER_SPACE: &str = "https://tuan2308-upscaler.hf.space";
const POLLINATIONS_URL: &str = "https://text.pollinations.ai/openai";

const VIDEO_ENDPOINT: &str = "generate_video";
const VIDEO_PREDICT_SECS: u64 = 60;

const ACTIONS: [Action; 6] = [
    Action::Generate,
    Action::Edit,
    Action::Text,
    Action::Video,
    Action::TaskStatus,
    Action::Upscaler,
];

/// Hugging Face Spaces（Gradio 队列接口）。可匿名调用，Token 只用于提升 ZeroGPU 配额。
/// 文本优化走 Pollinations 的公开接口，不消耗 Token。
pub struct HuggingFaceProvider {
    client: UpstreamClient,
    models: Vec<ProviderModel>,
}

fn models() -> Vec<ProviderModel> {
    use Capability::*;
    let m = |key: &str, api: &str, name: &str, cap| ProviderModel::new(NAME, key, api, name, cap);
    vec![
        m("z-image-turbo", "z-image-turbo", "Z-Image Turbo (Hugging Face)", Text2Image).with_steps(1, 20, 9),
        m("qwen-image", "qwen-image", "Qwen Image (Hugging Face)", Text2Image).with_steps(1, 20, 8),
        m("ovis-image", "ovis-image", "Ovis Image (Hugging Face)", Text2Image)
            .with_steps(1, 50, 24)
            .with_guidance(1.0, 10.0, 4.0),
        m("flux-1-schnell", "flux-1-schnell", "FLUX.1 Schnell (Hugging Face)", Text2Image).with_steps(1, 10, 4),
        m("qwen-image-edit", "qwen-image-edit", "Qwen Image Edit (Hugging Face)", Image2Image)
            .with_steps(1, 20, 4)
            .with_guidance(0.5, 2.0, 1.0),
        m("realesrgan", "realesrgan", "RealESRGAN x4 Plus (Hugging Face)", Upscaler),
        m("wan2.2-i2v", "wan2.2-i2v", "Wan2.2 I2V (Hugging Face)", Image2Video)
            .with_steps(1, 20, 6)
            .with_guidance(1.0, 10.0, 1.0),
        m("openai-gpt-4_1-nano", "openai-fast", "OpenAI GPT-4.1 Nano (Pollinations)", Text2Text),
        m("openai-gpt-5-nano", "openai", "OpenAI GPT-5 Nano (Pollinations)", Text2Text),
    ]
}

struct GenerateArgs<'a> {
    prompt: &'a str,
    ar: &'a str,
    width: u32,
    height: u32,
    seed: u64,
    /// 客户端未指定 seed 时让 Space 自行随机。
    randomize: bool,
    steps: Option<u64>,
    guidance: Option<f64>,
}

/// 文生图各 Space 的入口与参数顺序。
fn generate_call(api_model: &str, a: &GenerateArgs<'_>) -> (&'static str, &'static str, Value) {
    match api_model {
        "flux-1-schnell" => (
            FLUX_SCHNELL_SPACE,
            "infer",
            json!([a.prompt, a.seed, false, a.width, a.height, a.steps.unwrap_or(4)]),
        ),
        "qwen-image" => (
            QWEN_IMAGE_SPACE,
            "generate_image",
            json!([
                a.prompt,
                a.seed,
                a.randomize,
                a.ar,
                a.guidance.unwrap_or(3.0),
                a.steps.unwrap_or(8)
            ]),
        ),
        "ovis-image" => (
            OVIS_IMAGE_SPACE,
            "generate",
            json!([
                a.prompt,
                a.height,
                a.width,
                a.seed,
                a.steps.unwrap_or(24),
                a.guidance.unwrap_or(4.0)
            ]),
        ),
        _ => (
            Z_IMAGE_SPACE,
            "generate_image",
            json!([a.prompt, a.height, a.width, a.steps.unwrap_or(9), a.seed, false]),
        ),
    }
}

fn result_url(provider: &str, v: Option<&Value>) -> Result<String, ProviderError> {
    v.and_then(|f| f.get("url").or_else(|| f.pointer("/video/url")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::invalid_response(provider, "Gradio 结果中没有文件地址"))
}

impl HuggingFaceProvider {
    pub fn new(client: UpstreamClient) -> Self {
        Self {
            client,
            models: models(),
        }
    }

    fn unsupported_model(model: &str, action: Action) -> ProviderError {
        ProviderError::invalid_params(format!("模型 {model} 不支持 {action}"))
    }

    async fn generate(&self, p: &InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        let prompt = p.require_str("prompt")?;
        let ar = p.str("ar").unwrap_or("1:1");
        let (width, height) = common::dimensions(ar, p.bool("hd").unwrap_or(true), None);
        let explicit_seed = p.u64("seed");
        let seed = explicit_seed.unwrap_or_else(random_seed);
        let steps = p.u64("steps");
        let guidance = p.f64("guidance");

        let args = GenerateArgs {
            prompt,
            ar,
            width,
            height,
            seed,
            randomize: explicit_seed.is_none(),
            steps,
            guidance,
        };
        let (space, endpoint, data) = generate_call(self.api_model_id(&p.model), &args);
        let out = self.client.gradio_call(NAME, space, endpoint, token, data).await?;

        Ok(InvokeOutput::Completed(json!({
            "url": result_url(NAME, out.get(0))?,
            "width": width,
            "height": height,
            "seed": seed,
            "steps": steps,
            "guidance": guidance,
        })))
    }

    async fn upload(&self, token: Option<&str>, data: Vec<u8>, file_name: &str, content_type: &str) -> Result<String, ProviderError> {
        self.client
            .gradio_upload(NAME, QWEN_IMAGE_EDIT_SPACE, token, data, file_name, content_type)
            .await
    }

    async fn edit(&self, p: InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        if p.images.is_empty() {
            return Err(ProviderError::invalid_params("image 参数不能为空"));
        }
        if self.api_model_id(&p.model) != "qwen-image-edit" {
            return Err(Self::unsupported_model(&p.model, Action::Edit));
        }
        let prompt = p.require_str("prompt")?.to_string();
        let seed = p.u64("seed").unwrap_or_else(random_seed);
        let steps = p.u64("steps").unwrap_or(4);
        let guidance = p.f64("guidance").unwrap_or(1.0);
        let width = p.u64("width");
        let height = p.u64("height");

        let mut gallery = Vec::with_capacity(p.images.len());
        for image in p.images {
            let path = match image {
                ImageInput::Url(url) => url,
                ImageInput::Bytes {
                    data,
                    file_name,
                    content_type,
                } => self.upload(token, data, &file_name, &content_type).await?,
            };
            gallery.push(json!({ "image": gradio_file(&path) }));
        }

        let data = json!([gallery, prompt, seed, false, guidance, steps, height, width, true]);
        let out = self
            .client
            .gradio_call(NAME, QWEN_IMAGE_EDIT_SPACE, "infer", token, data)
            .await?;
        let url = out
            .pointer("/0/0/image/url")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::invalid_response(NAME, "Gradio 结果中没有图片地址"))?;

        Ok(InvokeOutput::Completed(json!({
            "url": url,
            "seed": seed,
            "steps": steps,
            "guidance": guidance,
        })))
    }

    async fn text(&self, p: &InvokeParams) -> Result<InvokeOutput, ProviderError> {
        let prompt = p.require_str("prompt")?;
        let model = if p.model.is_empty() {
            "openai-fast"
        } else {
            self.api_model_id(&p.model)
        };
        let body = json!({
            "model": model,
            "messages": optimize_messages(prompt),
            "stream": false,
        });
        let data = self.client.post_json(NAME, POLLINATIONS_URL, None, &body).await?;
        Ok(InvokeOutput::Completed(json!({
            "text": common::chat_text(&data, prompt),
        })))
    }

    async fn video(&self, p: &InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        if self.api_model_id(&p.model) != "wan2.2-i2v" {
            return Err(Self::unsupported_model(&p.model, Action::Video));
        }
        let image_url = p.require_str("imageUrl")?;
        let prompt = p.str("prompt").unwrap_or(DEFAULT_VIDEO_PROMPT);
        let duration = p.f64("duration").unwrap_or(3.0);
        let steps = p.u64("steps").unwrap_or(6);
        let guidance = p.f64("guidance").unwrap_or(1.0);

        let data = json!([
            gradio_file(image_url),
            prompt,
            steps,
            VIDEO_NEGATIVE_PROMPT,
            duration,
            guidance,
            guidance,
            random_seed(),
            false,
        ]);
        let event_id = self
            .client
            .gradio_submit(NAME, WAN2_VIDEO_SPACE, VIDEO_ENDPOINT, token, data)
            .await?;

        Ok(InvokeOutput::Pending {
            task_id: event_id,
            predict: VIDEO_PREDICT_SECS,
        })
    }

    /// 视频任务的 event_id 即任务 ID；读取 SSE 结果，尚未完成时视为处理中。
    async fn task_status(&self, p: &InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        let task_id = p.require_str("taskId")?;
        let out = self
            .client
            .gradio_result(NAME, WAN2_VIDEO_SPACE, VIDEO_ENDPOINT, task_id, token)
            .await?;
        let poll = match out {
            Some(v) => TaskPoll::Succeeded {
                url: result_url(NAME, v.get(0))?,
            },
            None => TaskPoll::Processing,
        };
        Ok(InvokeOutput::Task(poll))
    }

    async fn upscale(&self, p: &InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        let image_url = p.require_str("imageUrl")?;
        let bytes = self.client.download(NAME, image_url).await?;
        let path = self.upload(token, bytes, "image.png", "image/png").await?;

        let data = json!([
            gradio_file(&format!("{QWEN_IMAGE_EDIT_SPACE}/gradio_api/file={path}")),
            "RealESRGAN_x4plus",
            0.5,
            false,
            4,
        ]);
        let out = self
            .client
            .gradio_call(NAME, UPSCALER_SPACE, "realesrgan", token, data)
            .await?;
        Ok(InvokeOutput::Completed(json!({
            "url": result_url(NAME, out.get(0))?,
        })))
    }
}

#[async_trait]
impl ProviderAdapter for HuggingFaceProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_actions(&self) -> &[Action] {
        &ACTIONS
    }

    fn models(&self) -> &[ProviderModel] {
        &self.models
    }

    fn allows_anonymous(&self) -> bool {
        true
    }

    fn action_uses_token(&self, action: Action) -> bool {
        action != Action::Text
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
            Action::Text => self.text(&params).await,
            Action::Video => self.video(&params, token).await,
            Action::TaskStatus => self.task_status(&params, token).await,
            Action::Upscaler => self.upscale(&params, token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::Offset;

    fn provider() -> HuggingFaceProvider {
        HuggingFaceProvider::new(UpstreamClient::new(&Config::default()).unwrap())
    }

    #[test]
    fn anonymous_with_token_free_text() {
        let p = provider();
        assert!(p.allows_anonymous());
        assert!(!p.action_uses_token(Action::Text));
        assert!(p.action_uses_token(Action::Generate));
        assert_eq!(p.quota_utc_offset(), chrono::Utc.fix());
        assert_eq!(p.api_model_id("openai-gpt-5-nano"), "openai");
        assert!(p.find_model("wan2.2-i2v").is_some());
    }

    #[test]
    fn generate_call_picks_space_and_argument_order() {
        let args = |ar, width, height, seed, randomize, steps| GenerateArgs {
            prompt: "cat",
            ar,
            width,
            height,
            seed,
            randomize,
            steps,
            guidance: None,
        };

        let (space, endpoint, data) = generate_call("ovis-image", &args("1:1", 2048, 1152, 7, false, None));
        assert_eq!(space, OVIS_IMAGE_SPACE);
        assert_eq!(endpoint, "generate");
        assert_eq!(data, json!(["cat", 1152, 2048, 7, 24, 4.0]));

        let (space, endpoint, data) =
            generate_call("qwen-image", &args("16:9", 2048, 1152, 7, true, Some(10)));
        assert_eq!(space, QWEN_IMAGE_SPACE);
        assert_eq!(endpoint, "generate_image");
        assert_eq!(data, json!(["cat", 7, true, "16:9", 3.0, 10]));

        let (space, _, data) = generate_call("z-image-turbo", &args("1:1", 2048, 2048, 1, false, None));
        assert_eq!(space, Z_IMAGE_SPACE);
        assert_eq!(data, json!(["cat", 2048, 2048, 9, 1, false]));
    }

    #[tokio::test]
    async fn video_rejects_image_models() {
        let params = InvokeParams {
            model: "z-image-turbo".to_string(),
            body: json!({"imageUrl": "https://x/a.png"}).as_object().cloned().unwrap(),
            images: Vec::new(),
        };
        let err = provider().invoke(Action::Video, params, None).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidParams(_)));
    }

    #[test]
    fn result_url_accepts_plain_and_video_files() {
        let plain = json!({"url": "https://hf/a.png"});
        assert_eq!(result_url(NAME, Some(&plain)).unwrap(), "https://hf/a.png");
        let video = json!({"video": {"url": "https://hf/v.mp4"}});
        assert_eq!(result_url(NAME, Some(&video)).unwrap(), "https://hf/v.mp4");
        assert!(result_url(NAME, None).is_err());
    }
}
