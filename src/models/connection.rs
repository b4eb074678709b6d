//! 服务连接模型
//! 用户与第三方服务之间的授权链接，令牌由外部代理持有

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OAuth 连接记录，按 (user_id, service) 唯一
///
/// 断开连接只做软删除（is_active=false），保证审计链路完整。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: String,
    pub service: String,
    /// 令牌代理侧的连接标识
    pub connection_id: String,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 连接列表的响应 DTO（不暴露代理侧连接标识）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: Uuid,
    pub service: String,
    pub is_active: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl From<Connection> for ConnectionSummary {
    fn from(conn: Connection) -> Self {
        Self {
            id: conn.id,
            service: conn.service,
            is_active: conn.is_active,
            last_used: conn.last_used,
            scopes: conn.scopes,
        }
    }
}

/// 令牌代理回传的连接生命周期事件
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerEvent {
    /// auth | refresh | delete
    #[serde(rename = "type")]
    pub event_type: String,
    pub connection_id: String,
    pub provider_config_key: String,
}
