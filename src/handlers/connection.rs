//! 服务连接的 HTTP 处理器

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::{
    auth::AuthContext, error::AppError, middleware::AppState, models::connection::BrokerEvent,
};

/// 列出当前用户的服务连接
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let connections = state
        .connection_service
        .list_for_user(&auth_context.user_id)
        .await?;

    Ok(Json(json!({ "connections": connections })))
}

/// 令牌代理的连接生命周期回调（auth/refresh/delete）
pub async fn broker_webhook(
    State(state): State<Arc<AppState>>,
    Json(event): Json<BrokerEvent>,
) -> Result<impl IntoResponse, AppError> {
    state.connection_service.handle_broker_event(&event).await?;

    Ok(Json(json!({ "success": true })))
}
