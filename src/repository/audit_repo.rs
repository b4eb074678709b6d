//! Audit repository (审计数据访问)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::audit::{AuditLog, AuditLogFilters},
};

/// 审计日志存储能力
///
/// 抽成 trait 以便测试注入内存实现，也允许多实例部署替换后端。
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// 插入一条审计日志
    async fn insert(&self, log: &AuditLog) -> Result<(), AppError>;

    /// 按用户查询审计日志（executed_at 倒序）
    async fn query_user_logs(
        &self,
        user_id: &str,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, AppError>;

    /// 拉取某服务在时间区间内的全部日志（统计用）
    async fn fetch_service_window(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditLog>, AppError>;

    /// 删除早于截止时间的日志，返回删除条数
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

pub struct PgAuditRepository {
    db: PgPool,
}

impl PgAuditRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditStore for PgAuditRepository {
    /// 插入审计日志
    async fn insert(&self, log: &AuditLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, user_id, service, action, resource, parameters, result, status,
                error_code, error_message, execution_time_ms, retry_count,
                ip_address, user_agent, request_id, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(log.id)
        .bind(&log.user_id)
        .bind(&log.service)
        .bind(&log.action)
        .bind(&log.resource)
        .bind(&log.parameters)
        .bind(&log.result)
        .bind(&log.status)
        .bind(&log.error_code)
        .bind(&log.error_message)
        .bind(log.execution_time_ms)
        .bind(log.retry_count)
        .bind(&log.ip_address)
        .bind(&log.user_agent)
        .bind(&log.request_id)
        .bind(log.executed_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 查询某用户的审计日志
    async fn query_user_logs(
        &self,
        user_id: &str,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, AppError> {
        let mut query = String::from("SELECT * FROM audit_logs WHERE user_id = $1");
        let mut index = 1;

        if filters.service.is_some() {
            index += 1;
            query.push_str(&format!(" AND service = ${}", index));
        }
        if filters.action.is_some() {
            index += 1;
            query.push_str(&format!(" AND action = ${}", index));
        }
        if filters.status.is_some() {
            index += 1;
            query.push_str(&format!(" AND status = ${}", index));
        }
        if filters.start_time.is_some() {
            index += 1;
            query.push_str(&format!(" AND executed_at >= ${}", index));
        }
        if filters.end_time.is_some() {
            index += 1;
            query.push_str(&format!(" AND executed_at <= ${}", index));
        }

        query.push_str(&format!(
            " ORDER BY executed_at DESC LIMIT ${} OFFSET ${}",
            index + 1,
            index + 2
        ));

        let mut query_builder = sqlx::query_as::<_, AuditLog>(&query).bind(user_id);

        if let Some(service) = &filters.service {
            query_builder = query_builder.bind(service);
        }
        if let Some(action) = &filters.action {
            query_builder = query_builder.bind(action);
        }
        if let Some(status) = &filters.status {
            query_builder = query_builder.bind(status);
        }
        if let Some(start_time) = filters.start_time {
            query_builder = query_builder.bind(start_time);
        }
        if let Some(end_time) = filters.end_time {
            query_builder = query_builder.bind(end_time);
        }

        let logs = query_builder
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await?;

        Ok(logs)
    }

    /// 拉取统计窗口内的服务日志
    async fn fetch_service_window(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditLog>, AppError> {
        let logs = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT * FROM audit_logs
            WHERE service = $1 AND executed_at >= $2 AND executed_at <= $3
            ORDER BY executed_at ASC
            "#,
        )
        .bind(service)
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;

        Ok(logs)
    }

    /// 按保留期批量删除
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE executed_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
