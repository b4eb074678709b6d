//! 项目上下文模型
//! 每次请求即时重算的聚合视图，不落库

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 紧急项优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// 排序权重：high=3 > medium=2 > low=1
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

/// 需要关注的条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrgentItem {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

/// 最近动态条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub title: String,
    pub description: String,
    pub timestamp: String,
    pub source: String,
}

/// 通信类汇总（邮件）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Communications {
    pub unread_count: u64,
    pub urgent_items: Vec<UrgentItem>,
    pub recent_activity: Vec<ActivityItem>,
}

/// 项目条目（任务管理）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEntry {
    pub name: String,
    /// 完成百分比（0 或 100）
    pub completion: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub status: String,
    pub source: String,
}

/// 财务汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Financials {
    pub total_receivables: f64,
    pub total_payables: f64,
    pub overdue_amount: f64,
    pub overdue_count: u64,
    pub currency: String,
}

/// 单个服务的编译状态
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub name: String,
    /// active | inactive | error
    pub status: String,
    pub last_sync: String,
    pub item_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 汇总计数
/// 不变式：total_items 恒等于各服务 item_count 之和
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub total_items: u64,
    pub urgent_items: u64,
    pub recent_activity: u64,
}

/// 编译后的项目上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContext {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub services: Vec<ServiceStatus>,
    pub summary: ContextSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub communications: Option<Communications>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<ProjectEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub financials: Option<Financials>,
    pub urgent_items: Vec<UrgentItem>,
}

impl ProjectContext {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.into(),
            services: Vec::new(),
            summary: ContextSummary::default(),
            communications: None,
            projects: None,
            financials: None,
            urgent_items: Vec::new(),
        }
    }
}

/// 单个服务编译出的上下文片段，等待合并
#[derive(Debug, Clone, Default)]
pub struct ServiceFragment {
    pub service: String,
    pub status: String,
    pub last_sync: String,
    pub item_count: u64,
    pub error: Option<String>,
    pub communications: Option<Communications>,
    pub projects: Option<Vec<ProjectEntry>>,
    pub financials: Option<Financials>,
    pub urgent_items: Vec<UrgentItem>,
}

impl ServiceFragment {
    /// 编译失败的占位片段：不携带任何业务数据
    pub fn failed(service: &str, error: impl Into<String>) -> Self {
        Self {
            service: service.to_string(),
            status: "error".to_string(),
            last_sync: Utc::now().to_rfc3339(),
            item_count: 0,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
