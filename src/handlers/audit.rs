//! 审计日志的 HTTP 处理器

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::{
    auth::AuthContext, error::AppError, middleware::AppState, models::audit::AuditLogFilters,
};

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub service: Option<String>,
    pub action: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct AuditStatsQuery {
    pub service: Option<String>,
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

/// 查询当前用户的审计日志
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filters = AuditLogFilters {
        service: query.service,
        action: query.action,
        status: query.status,
        start_time: None,
        end_time: None,
    };

    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);

    let logs = state
        .audit_service
        .get_user_logs(&auth_context.user_id, &filters, limit, offset)
        .await?;

    Ok(Json(json!({
        "logs": logs,
        "count": logs.len()
    })))
}

/// 聚合某服务在时间区间内的执行统计
pub async fn get_audit_stats(
    State(state): State<Arc<AppState>>,
    _auth_context: AuthContext,
    Query(query): Query<AuditStatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let service = query
        .service
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing required parameter: service".to_string()))?;

    let days = query.days.clamp(1, 365);
    let end = Utc::now();
    let start = end - Duration::days(days);

    let stats = state
        .audit_service
        .get_service_stats(&service, start, end)
        .await?;

    Ok(Json(json!({
        "service": service,
        "period": {
            "start": start.to_rfc3339(),
            "end": end.to_rfc3339(),
            "days": days,
        },
        "stats": stats,
    })))
}

/// 定时清理超出保留期的审计日志
/// 由外部调度器携带 cron 令牌调用；清理动作本身也记审计
pub async fn cleanup_audit_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let expected = format!(
        "Bearer {}",
        state.config.security.cron_token.expose_secret()
    );
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided != expected {
        return Err(AppError::Unauthorized);
    }

    let retention_days = state.config.context.audit_retention_days;

    match state.audit_service.cleanup_old_logs(retention_days).await {
        Ok(deleted_count) => {
            state
                .audit_service
                .log_success(
                    "system",
                    "system",
                    "audit_cleanup",
                    json!({
                        "deletedCount": deleted_count,
                        "retentionDays": retention_days,
                    }),
                )
                .await;

            Ok(Json(json!({
                "success": true,
                "deletedCount": deleted_count,
                "message": format!(
                    "Cleaned up {} audit logs older than {} days",
                    deleted_count, retention_days
                ),
            })))
        }
        Err(e) => {
            state
                .audit_service
                .log_error("system", "system", "audit_cleanup", "CLEANUP_FAILED", &e.to_string())
                .await;
            Err(e)
        }
    }
}
