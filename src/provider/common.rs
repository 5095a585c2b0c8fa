use crate::config::Config;
use crate::logging::{self, LogLevel};
use crate::provider::ProviderError;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use std::time::{Duration, Instant};

pub const FIXED_SYSTEM_PROMPT_SUFFIX: &str =
    "\nEnsure the output language matches the language of user's prompt that needs to be optimized.";

pub const DEFAULT_SYSTEM_PROMPT_CONTENT: &str = "I am a master AI image prompt engineering advisor, specializing in crafting prompts that yield cinematic, hyper-realistic, and deeply evocative visual narratives, optimized for advanced generative models.
My core purpose is to meticulously rewrite, expand, and enhance user's image prompts.
I transform prompts to create visually stunning images by rigorously optimizing elements such as dramatic lighting, intricate textures, compelling composition, and a distinctive artistic style.
My generated prompt output will be strictly under 300 words. Prior to outputting, I will internally validate that the refined prompt strictly adheres to the word count limit and effectively incorporates the intended stylistic and technical enhancements.
My output will consist exclusively of the refined image prompt text. It will commence immediately, with no leading whitespace.
The text will strictly avoid markdown, quotation marks, conversational preambles, explanations, or concluding remarks. Please describe the content using prose-style sentences.
**The character's face is clearly visible and unobstructed.**";

pub const VIDEO_NEGATIVE_PROMPT: &str = "Vivid colors, overexposed, static, blurry details, subtitles, style, artwork, painting, image, still, overall grayish tone, worst quality, low quality, JPEG compression artifacts, ugly, incomplete, extra fingers, poorly drawn hands, poorly drawn face, deformed, disfigured, malformed limbs, fused fingers, still image, cluttered background, three legs, many people in the background, walking backward, Screen shaking";

pub const DEFAULT_VIDEO_PROMPT: &str = "make this image come alive, cinematic motion, smooth animation";

/// 高清模式下只放大 1.5 倍的模型（上游对分辨率更敏感）。
const FLUX_FAMILY: [&str; 4] = ["flux-1-schnell", "FLUX_1-Krea-dev", "FLUX.1-dev", "FLUX.2-dev"];

pub fn base_dimensions(ratio: &str) -> (u32, u32) {
    match ratio.trim() {
        "16:9" => (1024, 576),
        "4:3" => (1024, 768),
        "3:2" => (960, 640),
        "9:16" => (576, 1024),
        "3:4" => (768, 1024),
        "2:3" => (640, 960),
        _ => (1024, 1024),
    }
}

pub fn dimensions(ratio: &str, hd: bool, api_model: Option<&str>) -> (u32, u32) {
    let (w, h) = base_dimensions(ratio);
    if !hd {
        return (w, h);
    }
    let multiplier = match api_model {
        Some(m) if FLUX_FAMILY.contains(&m) => 1.5,
        _ => 2.0,
    };
    (
        (w as f64 * multiplier).round() as u32,
        (h as f64 * multiplier).round() as u32,
    )
}

/// 提示词优化请求的 messages。
pub fn optimize_messages(prompt: &str) -> Value {
    json!([
        {
            "role": "system",
            "content": format!("{DEFAULT_SYSTEM_PROMPT_CONTENT}{FIXED_SYSTEM_PROMPT_SUFFIX}"),
        },
        { "role": "user", "content": prompt },
    ])
}

/// OpenAI 兼容响应中的首条回复；为空时退回原始提示词。
pub fn chat_text(data: &Value, fallback: &str) -> String {
    data.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// 从 Gradio SSE 文本中取出 `complete` 事件的数据。
///
/// 遇到 `error` 事件时返回错误，错误信息带上事件数据，便于后续按配额类错误识别。
pub fn extract_complete_event(provider: &str, sse: &str) -> Result<Option<Value>, ProviderError> {
    let mut current: Option<&str> = None;
    for line in sse.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            current = Some(event.trim());
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        match current {
            Some("complete") => {
                return serde_json::from_str(data.trim())
                    .map(Some)
                    .map_err(|e| ProviderError::invalid_response(provider, format!("SSE 数据无法解析: {e}")));
            }
            Some("error") => {
                let detail = data.trim();
                let detail = if detail.is_empty() || detail == "null" {
                    "unknown error"
                } else {
                    detail
                };
                return Err(ProviderError::invalid_response(
                    provider,
                    format!("SSE 错误事件: {detail}"),
                ));
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Gradio 的文件引用。
pub fn gradio_file(path: &str) -> Value {
    json!({ "path": path, "meta": { "_type": "gradio.FileData" } })
}

/// 从上游错误响应体中提取可读信息与结构化错误码。
pub fn upstream_error(provider: &str, status: u16, body: &[u8]) -> ProviderError {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let text = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let (message, code) = match &parsed {
        Some(v) => {
            let message = text(v.get("message"))
                .or_else(|| text(v.pointer("/error/message")))
                .or_else(|| text(v.get("error")))
                .or_else(|| text(v.get("detail")))
                .or_else(|| text(v.get("msg")));
            let code = text(v.get("code"))
                .or_else(|| text(v.pointer("/error/code")))
                .or_else(|| text(v.pointer("/error/type")));
            (message, code)
        }
        None => (None, None),
    };

    let message = message.unwrap_or_else(|| {
        let raw = String::from_utf8_lossy(body);
        let raw = raw.trim();
        if raw.is_empty() {
            format!("HTTP {status}")
        } else {
            raw.chars().take(500).collect()
        }
    });

    ProviderError::Http {
        provider: provider.to_string(),
        status,
        message,
        code,
    }
}

/// provider 共用的 HTTP 客户端，按 `DEBUG` 等级输出上游请求日志。
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    log_level: LogLevel,
}

impl UpstreamClient {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));
        if cfg.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cfg.timeout_ms));
        }
        if !cfg.proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(cfg.proxy.trim())?);
        }
        Ok(Self {
            http: builder.build()?,
            log_level: cfg.log_level(),
        })
    }

    fn authorize(req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
        match token {
            Some(t) if !t.is_empty() => req.header(AUTHORIZATION, format!("Bearer {t}")),
            _ => req,
        }
    }

    async fn send(
        &self,
        provider: &str,
        method: &str,
        url: &str,
        log_body: &[u8],
        req: reqwest::RequestBuilder,
    ) -> Result<Vec<u8>, ProviderError> {
        if self.log_level.backend_enabled() {
            logging::backend_request(self.log_level, method, url, log_body);
        }
        let start = Instant::now();
        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if self.log_level.backend_enabled() {
            logging::backend_response(self.log_level, status.as_u16(), start.elapsed(), &bytes);
        }

        if !status.is_success() {
            return Err(upstream_error(provider, status.as_u16(), &bytes));
        }
        Ok(bytes.to_vec())
    }

    fn parse_json(provider: &str, bytes: &[u8]) -> Result<Value, ProviderError> {
        serde_json::from_slice(bytes).map_err(|e| {
            ProviderError::invalid_response(provider, format!("响应不是合法 JSON: {e}"))
        })
    }

    pub async fn post_json(
        &self,
        provider: &str,
        url: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<Value, ProviderError> {
        let raw = serde_json::to_vec(body)?;
        let req = Self::authorize(self.http.post(url), token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(raw.clone());
        let bytes = self.send(provider, "POST", url, &raw, req).await?;
        Self::parse_json(provider, &bytes)
    }

    pub async fn post_multipart(
        &self,
        provider: &str,
        url: &str,
        token: Option<&str>,
        form: Form,
    ) -> Result<Value, ProviderError> {
        let req = Self::authorize(self.http.post(url), token).multipart(form);
        let bytes = self.send(provider, "POST", url, b"(multipart)", req).await?;
        Self::parse_json(provider, &bytes)
    }

    pub async fn get_json(
        &self,
        provider: &str,
        url: &str,
        token: Option<&str>,
    ) -> Result<Value, ProviderError> {
        let req = Self::authorize(self.http.get(url), token);
        let bytes = self.send(provider, "GET", url, &[], req).await?;
        Self::parse_json(provider, &bytes)
    }

    pub async fn get_text(
        &self,
        provider: &str,
        url: &str,
        token: Option<&str>,
    ) -> Result<String, ProviderError> {
        let req = Self::authorize(self.http.get(url), token);
        let bytes = self.send(provider, "GET", url, &[], req).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// 不带鉴权地下载远程文件。
    pub async fn download(&self, provider: &str, url: &str) -> Result<Vec<u8>, ProviderError> {
        let req = self.http.get(url);
        self.send(provider, "GET", url, &[], req).await
    }

    /// 提交 Gradio 队列任务，返回 `event_id`。
    pub async fn gradio_submit(
        &self,
        provider: &str,
        base: &str,
        endpoint: &str,
        token: Option<&str>,
        data: Value,
    ) -> Result<String, ProviderError> {
        let url = format!("{base}/gradio_api/call/{endpoint}");
        let queued = self
            .post_json(provider, &url, token, &json!({ "data": data }))
            .await?;
        queued
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid_response(provider, "Gradio 队列未返回 event_id"))
    }

    /// 读取 Gradio 任务的 SSE 结果；流结束仍无 `complete` 事件时返回 `None`。
    pub async fn gradio_result(
        &self,
        provider: &str,
        base: &str,
        endpoint: &str,
        event_id: &str,
        token: Option<&str>,
    ) -> Result<Option<Value>, ProviderError> {
        let url = format!("{base}/gradio_api/call/{endpoint}/{event_id}");
        let text = self.get_text(provider, &url, token).await?;
        extract_complete_event(provider, &text)
    }

    /// 提交并等待 Gradio 任务完成。
    pub async fn gradio_call(
        &self,
        provider: &str,
        base: &str,
        endpoint: &str,
        token: Option<&str>,
        data: Value,
    ) -> Result<Value, ProviderError> {
        let event_id = self
            .gradio_submit(provider, base, endpoint, token, data)
            .await?;
        self.gradio_result(provider, base, endpoint, &event_id, token)
            .await?
            .ok_or_else(|| ProviderError::invalid_response(provider, "Gradio 未返回结果"))
    }

    /// 上传文件到 Gradio Space，返回服务端文件路径。
    pub async fn gradio_upload(
        &self,
        provider: &str,
        base: &str,
        token: Option<&str>,
        data: Vec<u8>,
        file_name: &str,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        let part = Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| ProviderError::invalid_params(format!("图片类型无效: {e}")))?;
        let form = Form::new().part("files", part);
        let url = format!("{base}/gradio_api/upload");
        let uploaded = self.post_multipart(provider, &url, token, form).await?;
        uploaded
            .get(0)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid_response(provider, "Gradio 上传响应无效"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_follow_ratio_and_hd_multiplier() {
        assert_eq!(base_dimensions("16:9"), (1024, 576));
        assert_eq!(base_dimensions("7:5"), (1024, 1024));
        assert_eq!(dimensions("3:2", false, None), (960, 640));
        assert_eq!(dimensions("3:2", true, None), (1920, 1280));
        assert_eq!(dimensions("16:9", true, Some("FLUX.2-dev")), (1536, 864));
        assert_eq!(dimensions("1:1", true, Some("z-image-turbo")), (2048, 2048));
    }

    #[test]
    fn extract_complete_event_reads_data_after_complete() {
        let sse = "event: generating\ndata: [null]\n\nevent: complete\ndata: [{\"url\":\"https://x/a.png\"}]\n\n";
        let v = extract_complete_event("huggingface", sse).unwrap().unwrap();
        assert_eq!(v[0]["url"], "https://x/a.png");

        let pending = "event: heartbeat\ndata: null\n";
        assert_eq!(extract_complete_event("huggingface", pending).unwrap(), None);
    }

    #[test]
    fn extract_complete_event_surfaces_error_events() {
        let sse = "event: error\ndata: \"You have exceeded your GPU quota\"\n";
        let err = extract_complete_event("huggingface", sse).unwrap_err();
        assert!(err.to_string().contains("GPU quota"));

        let err = extract_complete_event("huggingface", "event: error\ndata: null\n").unwrap_err();
        assert!(err.to_string().contains("unknown error"));
    }

    #[test]
    fn upstream_error_prefers_structured_fields() {
        let body = br#"{"error":{"message":"You exceeded your current quota","code":"insufficient_quota"}}"#;
        match upstream_error("gitee", 400, body) {
            ProviderError::Http { status, message, code, .. } => {
                assert_eq!(status, 400);
                assert_eq!(message, "You exceeded your current quota");
                assert_eq!(code.as_deref(), Some("insufficient_quota"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        match upstream_error("modelscope", 502, b"") {
            ProviderError::Http { message, code, .. } => {
                assert_eq!(message, "HTTP 502");
                assert_eq!(code, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn chat_text_falls_back_to_prompt() {
        let data = json!({"choices": [{"message": {"content": "refined"}}]});
        assert_eq!(chat_text(&data, "raw"), "refined");
        assert_eq!(chat_text(&json!({}), "raw"), "raw");
    }
}
