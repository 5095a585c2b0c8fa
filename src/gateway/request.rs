use crate::error::AppError;
use crate::provider::{ImageInput, InvokeParams};
use axum::extract::Multipart;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

/// 解析后的 `/v1/{action}` 请求。
#[derive(Debug)]
pub struct ActionRequest {
    pub model: Option<String>,
    pub params: InvokeParams,
}

impl ActionRequest {
    pub fn require_model(&self) -> Result<&str, AppError> {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| AppError::missing_param("model"))
    }
}

/// JSON 请求体：`model` 单独取出，`image` 可以是字符串或字符串数组（URL 或 data URI）。
pub fn from_json(bytes: &[u8]) -> Result<ActionRequest, AppError> {
    let value: Value = if bytes.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(bytes)
            .map_err(|e| AppError::bad_request(format!("请求体不是合法 JSON: {e}")))?
    };
    let Value::Object(mut body) = value else {
        return Err(AppError::bad_request("请求体必须是 JSON 对象"));
    };

    let model = match body.remove("model") {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };

    let images = match body.remove("image") {
        Some(Value::String(s)) => vec![image_from_str(s)?],
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(image_from_str(s)),
                _ => None,
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };

    Ok(ActionRequest {
        model,
        params: InvokeParams {
            model: String::new(),
            body,
            images,
        },
    })
}

/// multipart 表单（编辑接口上传图片用）：`image` 字段可重复，其余字段按文本处理。
pub async fn from_multipart(mut multipart: Multipart) -> Result<ActionRequest, AppError> {
    let mut model = None;
    let mut body = Map::new();
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("表单解析失败: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        if name == "image" && file_name.is_some() {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::bad_request(format!("读取图片失败: {e}")))?;
            images.push(ImageInput::Bytes {
                data: data.to_vec(),
                file_name: file_name.unwrap_or_else(|| "image.png".to_string()),
                content_type: content_type.unwrap_or_else(|| "image/png".to_string()),
            });
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::bad_request(format!("读取字段 {name} 失败: {e}")))?;
        match name.as_str() {
            "model" => model = Some(text),
            "image" => images.push(image_from_str(text)?),
            _ => {
                body.insert(name, Value::String(text));
            }
        }
    }

    Ok(ActionRequest {
        model,
        params: InvokeParams {
            model: String::new(),
            body,
            images,
        },
    })
}

/// data URI 解码为字节，其余字符串按 URL 处理。
fn image_from_str(s: String) -> Result<ImageInput, AppError> {
    let Some(rest) = s.strip_prefix("data:") else {
        return Ok(ImageInput::Url(s));
    };
    let Some((meta, payload)) = rest.split_once(";base64,") else {
        return Ok(ImageInput::Url(s));
    };

    let data = STANDARD
        .decode(payload.trim())
        .map_err(|e| AppError::bad_request(format!("图片 base64 无效: {e}")))?;
    let content_type = if meta.is_empty() { "image/png" } else { meta };
    let ext = content_type.rsplit('/').next().unwrap_or("png");

    Ok(ImageInput::Bytes {
        data,
        file_name: format!("image.{ext}"),
        content_type: content_type.to_string(),
    })
}
