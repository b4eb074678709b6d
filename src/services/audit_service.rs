//! 审计日志服务
//! 记录每一次命令执行尝试；写入失败绝不影响主流程

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::audit::{ActionCount, AuditLog, AuditLogFilters, ServiceStats},
    repository::AuditStore,
};

/// 一条待写入的审计记录
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub user_id: String,
    pub service: String,
    pub action: String,
    pub resource: Option<String>,
    pub parameters: Value,
    pub result: Value,
    /// success | error | pending | cancelled
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

impl NewAuditEntry {
    pub fn new(user_id: &str, service: &str, action: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            service: service.to_string(),
            action: action.to_string(),
            resource: None,
            parameters: json!({}),
            result: json!({}),
            status: "success".to_string(),
            error_code: None,
            error_message: None,
            execution_time_ms: None,
            ip_address: None,
            user_agent: None,
            request_id: None,
        }
    }
}

pub struct AuditService {
    store: Arc<dyn AuditStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// 写入一条审计记录
    ///
    /// 永不失败：存储异常只上报诊断通道（日志 + 指标），
    /// 调用方看到的命令结果不得依赖审计落库成功。
    pub async fn log(&self, entry: NewAuditEntry) {
        let log = AuditLog {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            service: entry.service,
            action: entry.action,
            resource: entry.resource,
            parameters: entry.parameters,
            result: entry.result,
            status: entry.status,
            error_code: entry.error_code,
            error_message: entry.error_message,
            execution_time_ms: entry.execution_time_ms,
            retry_count: None,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            request_id: entry.request_id,
            executed_at: Utc::now(),
        };

        if let Err(e) = self.store.insert(&log).await {
            metrics::counter!("audit_write_failures_total").increment(1);
            tracing::error!(
                error = %e,
                user_id = %log.user_id,
                service = %log.service,
                action = %log.action,
                "Failed to create audit log"
            );
        }
    }

    /// 记录一次成功操作
    pub async fn log_success(&self, user_id: &str, service: &str, action: &str, result: Value) {
        let mut entry = NewAuditEntry::new(user_id, service, action);
        entry.result = result;
        self.log(entry).await;
    }

    /// 记录一次失败操作
    pub async fn log_error(
        &self,
        user_id: &str,
        service: &str,
        action: &str,
        error_code: &str,
        error_message: &str,
    ) {
        let mut entry = NewAuditEntry::new(user_id, service, action);
        entry.status = "error".to_string();
        entry.error_code = Some(error_code.to_string());
        entry.error_message = Some(error_message.to_string());
        self.log(entry).await;
    }

    /// 查询某用户的审计日志
    pub async fn get_user_logs(
        &self,
        user_id: &str,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, AppError> {
        self.store
            .query_user_logs(user_id, filters, limit, offset)
            .await
    }

    /// 统计某服务在时间区间内的执行情况
    pub async fn get_service_stats(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ServiceStats, AppError> {
        let logs = self.store.fetch_service_window(service, start, end).await?;
        Ok(compute_stats(&logs))
    }

    /// 删除超出保留期的日志，返回删除条数
    pub async fn cleanup_old_logs(&self, retention_days: i64) -> Result<u64, AppError> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let deleted = self.store.delete_older_than(cutoff).await?;

        tracing::info!(
            deleted = deleted,
            retention_days = retention_days,
            "Audit log cleanup completed"
        );

        Ok(deleted)
    }
}

/// 由日志列表计算统计值
///
/// top_actions 取前 5，按次数降序，并列时保持首次出现顺序。
fn compute_stats(logs: &[AuditLog]) -> ServiceStats {
    let total_actions = logs.len() as u64;
    let successful_actions = logs.iter().filter(|l| l.status == "success").count() as u64;
    let failed_actions = logs.iter().filter(|l| l.status == "error").count() as u64;

    let execution_times: Vec<i64> = logs.iter().filter_map(|l| l.execution_time_ms).collect();
    let average_execution_time = if execution_times.is_empty() {
        0
    } else {
        let sum: i64 = execution_times.iter().sum();
        (sum as f64 / execution_times.len() as f64).round() as i64
    };

    // 按首次出现顺序累计各动作次数
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    for log in logs {
        if !counts.contains_key(&log.action) {
            order.push(log.action.clone());
        }
        *counts.entry(log.action.clone()).or_insert(0) += 1;
    }

    let mut top_actions: Vec<ActionCount> = order
        .into_iter()
        .map(|action| {
            let count = counts[&action];
            ActionCount { action, count }
        })
        .collect();
    // 稳定排序：并列计数保持首次出现顺序
    top_actions.sort_by(|a, b| b.count.cmp(&a.count));
    top_actions.truncate(5);

    let error_rate = if total_actions > 0 {
        failed_actions as f64 / total_actions as f64
    } else {
        0.0
    };

    ServiceStats {
        total_actions,
        successful_actions,
        failed_actions,
        average_execution_time,
        top_actions,
        error_rate,
    }
}
