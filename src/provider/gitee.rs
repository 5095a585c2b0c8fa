use crate::provider::common::{
    self, DEFAULT_VIDEO_PROMPT, UpstreamClient, VIDEO_NEGATIVE_PROMPT, optimize_messages,
};
use crate::provider::{
    Action, Capability, ImageInput, InvokeOutput, InvokeParams, ProviderAdapter, ProviderError,
    ProviderModel, TaskPoll, supported_list,
};
use crate::util::id::random_seed;
use async_trait::async_trait;
use chrono::FixedOffset;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

pub const NAME: &str = "gitee";

const GENERATE_URL: &str = "https://ai.gitee.com/v1/images/generations";
const EDIT_URL: &str = "https://ai.gitee.com/v1/images/edits";
const CHAT_URL: &str = "https://ai.gitee.com/v1/chat/completions";
const VIDEO_TASK_URL: &str = "https://ai.gitee.com/v1/async/videos/image-to-video";
const TASK_STATUS_URL: &str = "https://ai.gitee.com/api/v1/task";

const EDIT_LORA_URL: &str =
    "https://gitee.com/realhugh/materials/raw/master/Qwen-Image-Edit-Lightning-8steps-V1.0.safetensors";

/// 视频任务的预计耗时（秒）。
const VIDEO_PREDICT_SECS: u64 = 400;
const VIDEO_FPS: f64 = 16.0;

const ACTIONS: [Action; 5] = [
    Action::Generate,
    Action::Edit,
    Action::Text,
    Action::Video,
    Action::TaskStatus,
];

/// Gitee AI（模力方舟）。必须配置 Token，额度按北京时间每日重置。
pub struct GiteeProvider {
    client: UpstreamClient,
    models: Vec<ProviderModel>,
}

fn models() -> Vec<ProviderModel> {
    use Capability::*;
    let m = |key: &str, api: &str, name: &str, cap| ProviderModel::new(NAME, key, api, name, cap);
    vec![
        m("z-image-turbo", "z-image-turbo", "Z-Image Turbo (Gitee AI)", Text2Image).with_steps(1, 20, 9),
        m("qwen-image", "Qwen-Image", "Qwen Image (Gitee AI)", Text2Image).with_steps(1, 20, 9),
        m("flux-2", "FLUX.2-dev", "FLUX.2 (Gitee AI)", Text2Image)
            .with_steps(1, 50, 9)
            .with_guidance(1.0, 10.0, 3.5),
        m("flux-1-schnell", "flux-1-schnell", "FLUX.1 Schnell (Gitee AI)", Text2Image).with_steps(1, 10, 9),
        m("flux-1-krea", "FLUX_1-Krea-dev", "FLUX.1 Krea (Gitee AI)", Text2Image)
            .with_steps(1, 50, 9)
            .with_guidance(1.0, 10.0, 3.5),
        m("flux-1", "FLUX.1-dev", "FLUX.1 (Gitee AI)", Text2Image)
            .with_steps(1, 50, 9)
            .with_guidance(1.0, 10.0, 3.5),
        m("qwen-image-edit", "Qwen-Image-Edit", "Qwen Image Edit (Gitee AI)", Image2Image)
            .with_steps(1, 20, 16)
            .with_guidance(1.0, 10.0, 4.0),
        m("wan2.2-i2v", "Wan2_2-I2V-A14B", "Wan2.2 I2V (Gitee AI)", Image2Video)
            .with_steps(1, 20, 10)
            .with_guidance(1.0, 10.0, 4.0),
        m("deepseek-v3", "DeepSeek-V3.2", "DeepSeek V3.2 (Gitee AI)", Text2Text),
        m("qwen-3", "Qwen3-Next-80B-A3B-Instruct", "Qwen 3 (Gitee AI)", Text2Text),
    ]
}

impl GiteeProvider {
    pub fn new(client: UpstreamClient) -> Self {
        Self {
            client,
            models: models(),
        }
    }

    fn first_url(data: &Value) -> Result<String, ProviderError> {
        data.pointer("/data/0/url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid_response(NAME, "响应中没有图片地址"))
    }

    async fn generate(&self, p: &InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        let prompt = p.require_str("prompt")?;
        let api_model = self.api_model_id(&p.model);
        let ar = p.str("ar").unwrap_or("1:1");
        let (width, height) = common::dimensions(ar, p.bool("hd").unwrap_or(true), Some(api_model));
        let seed = p.u64("seed").unwrap_or_else(random_seed);
        let steps = p.u64("steps").unwrap_or(9);
        let guidance = p.f64("guidance");

        let mut body = json!({
            "prompt": prompt,
            "model": api_model,
            "width": width,
            "height": height,
            "seed": seed,
            "num_inference_steps": steps,
            "response_format": "url",
        });
        if let Some(g) = guidance {
            body["guidance_scale"] = json!(g);
        }

        let data = self.client.post_json(NAME, GENERATE_URL, token, &body).await?;
        Ok(InvokeOutput::Completed(json!({
            "url": Self::first_url(&data)?,
            "width": width,
            "height": height,
            "seed": seed,
            "steps": steps,
            "guidance": guidance,
        })))
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

        let mut form = Form::new()
            .text("prompt", prompt)
            .text("model", api_model)
            .text("num_inference_steps", steps.to_string())
            .text("cfg_scale", guidance.to_string())
            .text("seed", seed.to_string())
            .text("response_format", "url")
            .text(
                "lora_weights",
                json!({ "url": EDIT_LORA_URL, "weight": 1 }).to_string(),
            );
        for image in p.images {
            form = match image {
                ImageInput::Url(url) => form.text("image", url),
                ImageInput::Bytes {
                    data,
                    file_name,
                    content_type,
                } => {
                    let part = Part::bytes(data)
                        .file_name(file_name)
                        .mime_str(&content_type)
                        .map_err(|e| ProviderError::invalid_params(format!("图片类型无效: {e}")))?;
                    form.part("image", part)
                }
            };
        }

        let data = self.client.post_multipart(NAME, EDIT_URL, token, form).await?;
        Ok(InvokeOutput::Completed(json!({
            "url": Self::first_url(&data)?,
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

    async fn video(&self, p: &InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        let image_url = p.require_str("imageUrl")?;
        let prompt = p.str("prompt").unwrap_or(DEFAULT_VIDEO_PROMPT);
        let (def_w, def_h) = common::base_dimensions(p.str("ar").unwrap_or("1:1"));
        let width = p.u64("width").unwrap_or(def_w as u64);
        let height = p.u64("height").unwrap_or(def_h as u64);
        let duration = p.f64("duration").unwrap_or(3.0);
        let steps = p.u64("steps").unwrap_or(10);
        let guidance = p.f64("guidance").unwrap_or(4.0);
        let num_frames = (duration * VIDEO_FPS).round() as u64;

        let form = Form::new()
            .text("image", image_url.to_string())
            .text("prompt", prompt.to_string())
            .text("negative_prompt", VIDEO_NEGATIVE_PROMPT)
            .text("model", self.api_model_id(&p.model).to_string())
            .text("num_inference_steps", steps.to_string())
            .text("num_frames", num_frames.to_string())
            .text("guidance_scale", guidance.to_string())
            .text("height", height.to_string())
            .text("width", width.to_string());

        let data = self.client.post_multipart(NAME, VIDEO_TASK_URL, token, form).await?;
        let task_id = data
            .get("task_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::invalid_response(NAME, "未返回 task_id"))?;

        Ok(InvokeOutput::Pending {
            task_id: task_id.to_string(),
            predict: VIDEO_PREDICT_SECS,
        })
    }

    async fn task_status(&self, p: &InvokeParams, token: Option<&str>) -> Result<InvokeOutput, ProviderError> {
        let task_id = p.require_str("taskId")?;
        let url = format!("{TASK_STATUS_URL}/{}", urlencoding::encode(task_id));
        let data = self.client.get_json(NAME, &url, token).await?;
        Ok(InvokeOutput::Task(parse_task(&data)))
    }
}

/// 任务状态：`success` 带 `output.file_url`，`failure`/`cancelled` 为失败，其余视为处理中。
fn parse_task(data: &Value) -> TaskPoll {
    let status = data.get("status").and_then(Value::as_str).unwrap_or_default();
    let output_str = |key: &str| {
        data.get("output")
            .and_then(|o| o.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    };

    match status {
        "success" => match output_str("file_url") {
            Some(url) => TaskPoll::Succeeded {
                url: url.to_string(),
            },
            None => TaskPoll::Processing,
        },
        "failure" | "failed" => TaskPoll::Failed {
            error: output_str("error")
                .or_else(|| output_str("message"))
                .unwrap_or("Video generation failed")
                .to_string(),
        },
        "cancelled" => TaskPoll::Failed {
            error: "任务已被取消".to_string(),
        },
        _ => TaskPoll::Processing,
    }
}

#[async_trait]
impl ProviderAdapter for GiteeProvider {
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
            Action::Video => self.video(&params, token).await,
            Action::TaskStatus => self.task_status(&params, token).await,
            other => Err(ProviderError::UnsupportedAction {
                provider: NAME.to_string(),
                action: other.to_string(),
                supported: supported_list(&ACTIONS),
            }),
        }
    }
}
