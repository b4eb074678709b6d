//! Audit domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Audit log entry, immutable after creation
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: String,
    pub service: String,
    pub action: String,
    pub resource: Option<String>,
    pub parameters: Value,
    pub result: Value,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub retry_count: Option<i32>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Audit log filters
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuditLogFilters {
    pub service: Option<String>,
    pub action: Option<String>,
    pub status: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Per-action invocation count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCount {
    pub action: String,
    pub count: u64,
}

/// Aggregated statistics for one service over a date range
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub total_actions: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
    /// Average execution time in milliseconds, rounded
    pub average_execution_time: i64,
    /// Top 5 actions by count, ties broken by first-seen order
    pub top_actions: Vec<ActionCount>,
    /// failed / total, 0.0 when no actions recorded
    pub error_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audit_log_serializes() {
        let log = AuditLog {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            service: "gmail".to_string(),
            action: "send_email".to_string(),
            resource: None,
            parameters: json!({"to": "a@b.c"}),
            result: json!({"sent": true}),
            status: "success".to_string(),
            error_code: None,
            error_message: None,
            execution_time_ms: Some(42),
            retry_count: None,
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("agent/1.0".to_string()),
            request_id: Some("req-1".to_string()),
            executed_at: Utc::now(),
        };

        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["service"], "gmail");
        assert_eq!(value["execution_time_ms"], 42);
    }

    #[test]
    fn test_filters_default_is_unfiltered() {
        let filters = AuditLogFilters::default();
        assert!(filters.service.is_none());
        assert!(filters.action.is_none());
        assert!(filters.status.is_none());
        assert!(filters.start_time.is_none());
        assert!(filters.end_time.is_none());
    }
}
