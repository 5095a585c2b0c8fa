use axum::http::HeaderMap;
use sonic_rs::prelude::*;
use std::borrow::Cow;
use std::time::Duration;

/// 日志等级（`DEBUG` 环境变量）：
/// - off：只保留 tracing 的常规运行日志
/// - low：额外输出客户端请求/响应（脱敏）
/// - medium：再加上发往上游 provider 的请求/响应（脱敏）
/// - high：同 medium，但请求/响应体不做截断
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "client" => Self::Low,
            "medium" | "backend" => Self::Medium,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn client_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn backend_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn raw_enabled(self) -> bool {
        self >= Self::High
    }
}

/// Token 只打印前 8 个字符，避免密钥进入日志。
pub fn mask_token(token: &str) -> String {
    if token.chars().count() <= 8 {
        return "***".to_string();
    }
    let prefix: String = token.chars().take(8).collect();
    format!("{prefix}...")
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

pub fn client_request(level: LogLevel, method: &str, path: &str, headers: &HeaderMap, body: &[u8]) {
    tracing::info!(
        "\n===================== 客户端请求 ======================\n[客户端请求] {method} {path}\n[客户端请求头]\n{}\n{}\n=========================================================",
        format_headers(headers),
        format_body_bytes(body, level.raw_enabled())
    );
}

pub fn client_response(status: u16, duration: Duration, body: Option<&serde_json::Value>) {
    let body = body
        .and_then(|v| serde_json::to_vec(v).ok())
        .map(|b| format_body_bytes(&b, false))
        .unwrap_or_default();
    tracing::info!(
        "\n===================== 客户端响应 ======================\n[客户端响应] {} {}ms\n{}\n==========================================================",
        status,
        format_duration_ms(duration),
        body
    );
}

pub fn backend_request(level: LogLevel, method: &str, url: &str, body: &[u8]) {
    tracing::info!(
        "\n====================== 上游请求 ========================\n[上游请求] {method} {url}\n{}\n==========================================================",
        format_body_bytes(body, level.raw_enabled())
    );
}

pub fn backend_response(level: LogLevel, status: u16, duration: Duration, body: &[u8]) {
    tracing::info!(
        "\n====================== 上游响应 ========================\n[上游响应] {} {}ms\n{}\n==========================================================",
        status,
        format_duration_ms(duration),
        format_body_bytes(body, level.raw_enabled())
    );
}

fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers.iter() {
        let key = name.as_str();
        let key_lc = key.to_lowercase();
        let redacted = key_lc == "authorization"
            || key_lc == "proxy-authorization"
            || key_lc == "x-api-key"
            || key_lc == "cookie";
        let val = if redacted {
            "***"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        out.push_str(key);
        out.push_str(": ");
        out.push_str(val);
        out.push('\n');
    }
    out
}

fn format_body_bytes(bytes: &[u8], raw: bool) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    if raw {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    // 大包（通常是 multipart 图片）不做解析，只给出长度。
    const MAX_PARSE_BYTES: usize = 2 * 1024 * 1024;
    if bytes.len() > MAX_PARSE_BYTES {
        return format!("(body too large: {} bytes)", bytes.len());
    }

    match sonic_rs::from_slice::<sonic_rs::Value>(bytes) {
        Ok(v) => {
            let sanitized = sanitize_json_for_log(&v);
            sonic_rs::to_string_pretty(&sanitized).unwrap_or_else(|_| sanitized.to_string())
        }
        Err(_) => truncate_text_for_log(&String::from_utf8_lossy(bytes)),
    }
}

fn truncate_text_for_log(s: &str) -> String {
    const MAX_CHARS: usize = 32 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}

/// 递归脱敏：截断 data URI 中的 base64，隐藏 token 字段。
fn sanitize_json_for_log(v: &sonic_rs::Value) -> sonic_rs::Value {
    if let Some(obj) = v.as_object() {
        let mut out = sonic_rs::Object::new();
        for (key, child) in obj.iter() {
            let sanitized = match key {
                "token" => match child.as_str() {
                    Some(s) => sonic_rs::Value::from(mask_token(s).as_str()),
                    None => sanitize_json_for_log(child),
                },
                _ => sanitize_json_for_log(child),
            };
            out.insert(key, sanitized);
        }
        return out.into_value();
    }

    if let Some(arr) = v.as_array() {
        let out: Vec<sonic_rs::Value> = arr.iter().map(sanitize_json_for_log).collect();
        return sonic_rs::Value::from(out);
    }

    if let Some(s) = v.as_str() {
        return sonic_rs::Value::from(truncate_data_uri(s).as_ref());
    }

    v.to_owned()
}

fn truncate_data_uri(s: &str) -> Cow<'_, str> {
    const KEEP: usize = 20;
    let Some(idx) = s.find(";base64,") else {
        return Cow::Borrowed(s);
    };
    let prefix_end = idx + ";base64,".len();
    let payload = &s[prefix_end..];
    if payload.len() <= KEEP * 2 + 60 {
        return Cow::Borrowed(s);
    }
    let omitted = payload.len() - KEEP * 2;
    Cow::Owned(format!(
        "{}{}...[TRUNCATED: {omitted} chars]...{}",
        &s[..prefix_end],
        &payload[..KEEP],
        &payload[payload.len() - KEEP..]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parse_accepts_aliases() {
        assert_eq!(LogLevel::parse(" LOW "), LogLevel::Low);
        assert_eq!(LogLevel::parse("backend"), LogLevel::Medium);
        assert_eq!(LogLevel::parse("raw"), LogLevel::High);
        assert_eq!(LogLevel::parse("whatever"), LogLevel::Off);
        assert!(LogLevel::Medium.client_enabled());
        assert!(!LogLevel::Low.backend_enabled());
    }

    #[test]
    fn mask_token_keeps_only_a_prefix() {
        assert_eq!(mask_token("hf_abcdefghijklmnop"), "hf_abcde...");
        assert_eq!(mask_token("abc"), "***");
    }

    #[test]
    fn truncate_data_uri_shortens_long_payloads() {
        let long = format!("data:image/png;base64,{}", "A".repeat(500));
        let out = truncate_data_uri(&long);
        assert!(out.starts_with("data:image/png;base64,AAAA"));
        assert!(out.contains("TRUNCATED: 460 chars"));

        let short = "data:image/png;base64,AAAA";
        assert_eq!(truncate_data_uri(short), short);
    }
}
