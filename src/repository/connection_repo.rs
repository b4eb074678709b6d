//! Connection repository (连接数据访问)

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{error::AppError, models::connection::Connection};

/// 连接记录存储能力
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// 列出某用户的全部连接
    async fn list(&self, user_id: &str) -> Result<Vec<Connection>, AppError>;

    /// 列出某用户的活跃连接
    async fn list_active(&self, user_id: &str) -> Result<Vec<Connection>, AppError>;

    /// OAuth 完成后插入或重新激活连接
    async fn upsert_active(
        &self,
        user_id: &str,
        service: &str,
        connection_id: &str,
        scopes: &[String],
    ) -> Result<Connection, AppError>;

    /// 令牌刷新事件：只更新时间戳
    async fn touch_refreshed(&self, connection_id: &str, service: &str) -> Result<(), AppError>;

    /// 断开连接：软删除，保留审计链路
    async fn mark_inactive(&self, connection_id: &str, service: &str) -> Result<(), AppError>;
}

pub struct PgConnectionRepository {
    db: PgPool,
}

impl PgConnectionRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConnectionStore for PgConnectionRepository {
    async fn list(&self, user_id: &str) -> Result<Vec<Connection>, AppError> {
        let connections = sqlx::query_as::<_, Connection>(
            "SELECT * FROM oauth_connections WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(connections)
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<Connection>, AppError> {
        let connections = sqlx::query_as::<_, Connection>(
            r#"
            SELECT * FROM oauth_connections
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(connections)
    }

    async fn upsert_active(
        &self,
        user_id: &str,
        service: &str,
        connection_id: &str,
        scopes: &[String],
    ) -> Result<Connection, AppError> {
        let now = Utc::now();

        let connection = sqlx::query_as::<_, Connection>(
            r#"
            INSERT INTO oauth_connections (
                id, user_id, service, connection_id, scopes, is_active,
                last_used, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, $6, $6)
            ON CONFLICT (user_id, service) DO UPDATE SET
                connection_id = EXCLUDED.connection_id,
                scopes = EXCLUDED.scopes,
                is_active = TRUE,
                last_used = EXCLUDED.last_used,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(service)
        .bind(connection_id)
        .bind(scopes)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(connection)
    }

    async fn touch_refreshed(&self, connection_id: &str, service: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE oauth_connections
            SET updated_at = $1
            WHERE connection_id = $2 AND service = $3
            "#,
        )
        .bind(Utc::now())
        .bind(connection_id)
        .bind(service)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn mark_inactive(&self, connection_id: &str, service: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE oauth_connections
            SET is_active = FALSE, updated_at = $1
            WHERE connection_id = $2 AND service = $3
            "#,
        )
        .bind(Utc::now())
        .bind(connection_id)
        .bind(service)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
