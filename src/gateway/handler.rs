use crate::error::AppError;
use crate::gateway::AppState;
use crate::gateway::request::{self, ActionRequest};
use crate::logging;
use crate::provider::{Action, LEGACY_DEFAULT_PROVIDER, supported_list};
use crate::util::id;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

/// 请求体上限（编辑接口会直接上传图片）。
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

pub async fn handle_health() -> Response {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

pub async fn handle_models(State(state): State<Arc<AppState>>) -> Response {
    Json(state.gateway.models(false).await).into_response()
}

pub async fn handle_all_models(State(state): State<Arc<AppState>>) -> Response {
    Json(state.gateway.models(true).await).into_response()
}

#[derive(Debug, Deserialize)]
pub struct TokenStatsQuery {
    #[serde(default)]
    provider: Option<String>,
}

pub async fn handle_token_stats(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenStatsQuery>,
) -> Result<Response, AppError> {
    let provider = q
        .provider
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(LEGACY_DEFAULT_PROVIDER);
    let stats = state.gateway.token_stats(provider).await?;
    Ok(Json(stats).into_response())
}

pub async fn handle_all_token_stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.gateway.all_token_stats().await).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct TokenResetRequest {
    #[serde(default)]
    provider: Option<String>,
}

pub async fn handle_token_reset(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let req: TokenResetRequest = if body.is_empty() {
        TokenResetRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::bad_request(format!("请求体不是合法 JSON: {e}")))?
    };
    let provider = req
        .provider
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::missing_param("provider"))?;

    state.gateway.reset_tokens(provider).await?;
    tracing::info!(provider, "Token 状态已重置");
    Ok(Json(json!({
        "success": true,
        "message": format!("Token status reset for {provider}"),
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct TaskStatusQuery {
    #[serde(default, rename = "taskId")]
    task_id: Option<String>,
}

pub async fn handle_task_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TaskStatusQuery>,
) -> Result<Response, AppError> {
    let task_id = q
        .task_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::missing_param("taskId"))?;
    Ok(Json(state.gateway.poll_task(task_id).await?).into_response())
}

/// `POST /v1/{action}`：JSON 请求体，或编辑接口的 multipart 表单。
pub async fn handle_action(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    request: Request,
) -> Result<Response, AppError> {
    let start = Instant::now();
    let log_level = state.cfg.log_level();

    let action: Action = action.parse().map_err(|a| AppError::UnknownAction {
        action: a,
        supported: supported_list(&Action::ALL),
    })?;

    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let parsed: ActionRequest = if is_multipart {
        if log_level.client_enabled() {
            logging::client_request(
                log_level,
                "POST",
                request.uri().path(),
                request.headers(),
                b"(multipart)",
            );
        }
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::bad_request(format!("表单解析失败: {e}")))?;
        request::from_multipart(multipart).await?
    } else {
        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| AppError::bad_request(format!("读取请求体失败: {e}")))?;
        if log_level.client_enabled() {
            logging::client_request(log_level, "POST", parts.uri.path(), &parts.headers, &bytes);
        }
        request::from_json(&bytes)?
    };

    let request_id = id::request_id();
    tracing::info!(
        request_id = %request_id,
        action = %action,
        model = parsed.model.as_deref().unwrap_or_default(),
        "收到请求"
    );

    let result: Value = if action == Action::TaskStatus {
        let task_id = parsed
            .params
            .str("taskId")
            .ok_or_else(|| AppError::missing_param("taskId"))?
            .to_string();
        state.gateway.poll_task(&task_id).await?
    } else {
        let model = parsed.require_model()?.to_string();
        state.gateway.invoke(action, &model, parsed.params).await?
    };

    tracing::info!(
        request_id = %request_id,
        elapsed_ms = logging::format_duration_ms(start.elapsed()),
        "请求完成"
    );
    if log_level.client_enabled() {
        logging::client_response(StatusCode::OK.as_u16(), start.elapsed(), Some(&result));
    }
    Ok(Json(result).into_response())
}

/// `POST /v1/task-status`：与 `/v1/{action}` 相同的处理，只是路径被静态路由占用。
pub async fn handle_action_task_status(
    state: State<Arc<AppState>>,
    request: Request,
) -> Result<Response, AppError> {
    handle_action(state, Path(Action::TaskStatus.as_str().to_string()), request).await
}
