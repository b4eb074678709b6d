//! 连接管理服务
//! 维护用户与第三方服务的授权链接记录，消费令牌代理的生命周期事件

use std::sync::Arc;

use crate::{
    error::AppError,
    models::connection::{BrokerEvent, ConnectionSummary},
    repository::ConnectionStore,
};

pub struct ConnectionService {
    store: Arc<dyn ConnectionStore>,
}

impl ConnectionService {
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self { store }
    }

    /// 列出某用户的全部连接
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<ConnectionSummary>, AppError> {
        let connections = self.store.list(user_id).await?;
        Ok(connections.into_iter().map(ConnectionSummary::from).collect())
    }

    /// 处理令牌代理回传的连接生命周期事件
    ///
    /// 约定：代理侧连接标识即用户标识。未知事件类型只记日志。
    pub async fn handle_broker_event(&self, event: &BrokerEvent) -> Result<(), AppError> {
        let service = event.provider_config_key.as_str();
        let connection_id = event.connection_id.as_str();

        match event.event_type.as_str() {
            "auth" => {
                // OAuth 完成：建立或重新激活连接
                self.store
                    .upsert_active(connection_id, service, connection_id, &[])
                    .await?;
                tracing::info!(service = %service, "Connection established");
            }
            "refresh" => {
                self.store.touch_refreshed(connection_id, service).await?;
                tracing::debug!(service = %service, "Connection token refreshed");
            }
            "delete" => {
                // 软删除，保留审计链路
                self.store.mark_inactive(connection_id, service).await?;
                tracing::info!(service = %service, "Connection deactivated");
            }
            other => {
                tracing::warn!(event_type = %other, "Ignoring unknown broker event");
            }
        }

        Ok(())
    }
}
