use crate::provider::ProviderError;

/// 调度层对一次失败的判定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 调用方放弃了请求：不换 Token，不标记。
    Cancelled,
    /// 当前 Token 额度耗尽：标记后换下一个。
    Quota,
    /// 其他错误：立即返回给调用方。
    Fatal,
}

const QUOTA_STATUS: [u16; 2] = [429, 402];

const QUOTA_CODES: [&str; 5] = [
    "insufficient_quota",
    "rate_limit_exceeded",
    "quota_exceeded",
    "billing_hard_limit_reached",
    "insufficient_balance",
];

const QUOTA_KEYWORDS: [&str; 6] = ["429", "quota", "credit", "arrear", "bill", "exhausted"];

/// 优先看结构化信号（状态码、错误码），都没有时才退回到消息关键字匹配。
pub fn classify(err: &ProviderError) -> FailureClass {
    match err {
        ProviderError::Cancelled => return FailureClass::Cancelled,
        // 参数或路由问题，换 Token 也没用。
        ProviderError::InvalidParams(_) | ProviderError::UnsupportedAction { .. } => {
            return FailureClass::Fatal;
        }
        _ => {}
    }

    if let Some(status) = err.status()
        && QUOTA_STATUS.contains(&status)
    {
        return FailureClass::Quota;
    }

    if let ProviderError::Http {
        code: Some(code), ..
    } = err
    {
        let code = code.to_lowercase();
        if QUOTA_CODES.contains(&code.as_str()) {
            return FailureClass::Quota;
        }
    }

    // 只扫上游返回的文字；传输错误的 Display 带有请求 URL，任务 ID 里可能恰好有 "429"。
    let message = match err {
        ProviderError::Http { message, .. } | ProviderError::InvalidResponse { message, .. } => {
            message.to_lowercase()
        }
        _ => return FailureClass::Fatal,
    };
    if QUOTA_KEYWORDS.iter().any(|k| message.contains(k)) {
        return FailureClass::Quota;
    }

    FailureClass::Fatal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, message: &str, code: Option<&str>) -> ProviderError {
        ProviderError::Http {
            provider: "gitee".to_string(),
            status,
            message: message.to_string(),
            code: code.map(str::to_string),
        }
    }

    #[test]
    fn structured_signals_win() {
        assert_eq!(classify(&http(429, "slow down", None)), FailureClass::Quota);
        assert_eq!(classify(&http(402, "pay up", None)), FailureClass::Quota);
        assert_eq!(
            classify(&http(400, "request rejected", Some("INSUFFICIENT_QUOTA"))),
            FailureClass::Quota
        );
        assert_eq!(
            classify(&http(403, "forbidden", Some("rate_limit_exceeded"))),
            FailureClass::Quota
        );
    }

    #[test]
    fn keyword_fallback_is_case_insensitive() {
        for msg in [
            "Daily QUOTA reached",
            "not enough credits",
            "account in arrears",
            "Billing problem",
            "GPU quota Exhausted",
        ] {
            assert_eq!(classify(&http(500, msg, None)), FailureClass::Quota, "{msg}");
        }
        assert_eq!(
            classify(&ProviderError::invalid_response("huggingface", "You have exceeded your GPU quota")),
            FailureClass::Quota
        );
    }

    #[test]
    fn everything_else_is_fatal() {
        assert_eq!(classify(&http(401, "invalid token", None)), FailureClass::Fatal);
        assert_eq!(classify(&http(500, "internal error", None)), FailureClass::Fatal);
        assert_eq!(
            classify(&ProviderError::invalid_params("quota must be positive")),
            FailureClass::Fatal
        );
        assert_eq!(classify(&ProviderError::Cancelled), FailureClass::Cancelled);
    }

    #[tokio::test]
    async fn transport_errors_ignore_keywords_in_the_url() {
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:1/api/v1/task/AB4291CD")
            .send()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));

        assert_eq!(classify(&ProviderError::Transport(err)), FailureClass::Fatal);
    }
}
