//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, middleware::AppState};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // Webhook 端点：HMAC 认证在处理器内完成，不走会话认证
    let webhook_routes = Router::new()
        .route(
            "/api/v1/webhook/command",
            post(handlers::webhook::execute_command),
        )
        .route(
            "/api/v1/webhook/broker",
            post(handlers::connection::broker_webhook),
        );

    // 审计查询端点：独立限流配额
    let audit_routes = Router::new()
        .route("/api/v1/audit/logs", get(handlers::audit::list_audit_logs))
        .route("/api/v1/audit/stats", get(handlers::audit::get_audit_stats))
        .layer(from_fn_with_state(
            state.clone(),
            crate::middleware::audit_rate_limit_middleware,
        ));

    // 需要会话认证的第一方端点
    let session_routes = Router::new()
        .route("/api/v1/context", get(handlers::context::get_context))
        .route(
            "/api/v1/connections",
            get(handlers::connection::list_connections),
        )
        .merge(audit_routes)
        .layer(from_fn_with_state(
            state.jwt_verifier.clone(),
            crate::auth::session_auth_middleware,
        ));

    // 定时任务端点：cron 令牌认证在处理器内完成
    let cron_routes = Router::new().route(
        "/api/v1/cron/cleanup-audit-logs",
        post(handlers::audit::cleanup_audit_logs),
    );

    // 指标端点
    let metrics_routes = Router::new().route("/metrics", get(handlers::metrics::metrics_export));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(webhook_routes)
        .merge(session_routes)
        .merge(cron_routes)
        .merge(metrics_routes)
        .layer(from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
