//! Webhook 命令入口
//! 每个请求按序经过：签名验证 → 限流 → 命令分发 → 审计落库 → 响应；
//! 认证失败与结构非法在审计和上游调用之前短路

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use secrecy::ExposeSecret;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::{
    middleware::{self, AppState},
    models::command::{AgentCommand, CommandStatus, WebhookResponse},
    ratelimit,
    security::{self, SecurityError},
    services::audit_service::NewAuditEntry,
};

/// POST /api/v1/webhook/command
pub async fn execute_command(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty());
    let timestamp = headers
        .get("x-timestamp")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty());

    // 两个认证头缺一即拒，且不产生审计记录
    if signature.is_none() || timestamp.is_none() {
        return unauthorized("Missing signature or timestamp");
    }

    let secret = state.config.security.webhook_secret.expose_secret().clone();
    let tolerance = state.config.security.timestamp_tolerance_secs;

    if let Err(e) = security::validate(&body, signature, timestamp, &secret, tolerance) {
        metrics::counter!("webhook_auth_failures_total").increment(1);
        let message = match e {
            SecurityError::StaleTimestamp => "Request too old or invalid timestamp",
            SecurityError::MissingSignature | SecurityError::MissingTimestamp => {
                "Missing signature or timestamp"
            }
            // 空载荷、密钥未配置都归为签名不可验证
            _ => "Invalid signature",
        };
        return unauthorized(message);
    }

    // 限流：标识符取调用方身份头/转发 IP，命名空间 ":webhook"；
    // 签名体里的 userId 不参与，畸形请求照样消耗配额
    let decision = state
        .rate_limiter
        .check(&headers, ":webhook", &state.config.rate_limits.webhook)
        .await;

    if !decision.success {
        return middleware::rate_limited_response(&decision);
    }

    // 解析命令；畸形 JSON 属于内部意外路径
    let command: AgentCommand = match serde_json::from_slice(&body) {
        Ok(command) => command,
        Err(e) => {
            tracing::error!(error = %e, "Webhook command processing error");
            let response = (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "COMMAND_EXECUTION_FAILED",
                    "message": e.to_string(),
                })),
            )
                .into_response();
            return with_limit(response, &decision);
        }
    };

    let ip_address = middleware::get_client_ip(&headers, state.config.security.trust_proxy);
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    // 结构校验失败仍尽量落审计（携带了可用的 userId 时）
    if !command.is_structurally_valid() {
        if !command.user_id.is_empty() {
            let mut entry = NewAuditEntry::new(
                &command.user_id,
                if command.service.is_empty() { "unknown" } else { &command.service },
                if command.action.is_empty() { "unknown" } else { &command.action },
            );
            entry.status = "error".to_string();
            entry.error_code = Some("VALIDATION_ERROR".to_string());
            entry.error_message = Some("Invalid command structure".to_string());
            entry.parameters = json!(command.params());
            entry.ip_address = Some(ip_address.clone());
            entry.user_agent = user_agent.clone();
            state.audit_service.log(entry).await;
        }

        let response = (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid command structure" })),
        )
            .into_response();
        return with_limit(response, &decision);
    }

    // 命令 ID 由服务端生成，保证审计关联唯一
    let command_id = Uuid::new_v4().to_string();
    let command = AgentCommand {
        request_id: Some(command_id.clone()),
        ..command
    };

    let start = Instant::now();
    let result = state.dispatcher.dispatch(&command).await;
    let execution_time_ms = start.elapsed().as_millis() as i64;

    // 审计：每个到达分发的命令恰好一条记录，成功失败都记
    let mut entry = NewAuditEntry::new(&command.user_id, &command.service, &command.action);
    entry.parameters = json!(command.params());
    entry.result = result.data.clone().unwrap_or_else(|| json!({}));
    entry.status = result.status.as_str().to_string();
    entry.execution_time_ms = Some(execution_time_ms);
    entry.ip_address = Some(ip_address);
    entry.user_agent = user_agent;
    entry.request_id = Some(command_id);

    if result.status == CommandStatus::Error {
        // 区分"上游拒绝"（调用未抛错但报告失败，结果里有数据）
        // 与"执行抛错"（结果里只有错误）
        entry.error_code = Some(if result.data.is_some() {
            "UPSTREAM_REJECTED".to_string()
        } else {
            "EXECUTION_ERROR".to_string()
        });
        entry.error_message = result.error.clone();
    }

    state.audit_service.log(entry).await;

    // 业务结果一律 200 信封；success 标志位区分成败
    let response = Json(WebhookResponse::from(result)).into_response();
    with_limit(response, &decision)
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

fn with_limit(mut response: Response, decision: &ratelimit::RateLimitDecision) -> Response {
    ratelimit::apply_headers(response.headers_mut(), decision);
    response
}
