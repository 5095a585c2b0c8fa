use crate::error::AppError;
use crate::gateway::AppState;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// `/v1/*` 的 Bearer 鉴权。未配置 `API_TOKEN` 时放行所有请求。
pub async fn require_api_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match check_bearer(&state.cfg.api_tokens, header) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

pub fn check_bearer(tokens: &[String], header: Option<&str>) -> Result<(), AppError> {
    if tokens.is_empty() {
        return Ok(());
    }
    let Some(header) = header else {
        return Err(AppError::unauthorized("缺少 Authorization 请求头"));
    };
    let Some(token) = header.strip_prefix("Bearer ") else {
        return Err(AppError::unauthorized("Authorization 格式应为 Bearer <token>"));
    };
    if !tokens.iter().any(|t| t == token.trim()) {
        return Err(AppError::unauthorized("Token 无效"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_when_no_tokens_configured() {
        assert!(check_bearer(&[], None).is_ok());
    }

    #[test]
    fn accepts_any_configured_token() {
        let tokens = vec!["a1".to_string(), "b2".to_string()];
        assert!(check_bearer(&tokens, Some("Bearer b2")).is_ok());
        assert!(matches!(
            check_bearer(&tokens, Some("Bearer nope")),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            check_bearer(&tokens, Some("Basic a1")),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(check_bearer(&tokens, None), Err(AppError::Unauthorized(_))));
    }
}
