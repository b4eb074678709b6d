//! 上下文编译服务
//! 查询用户的全部活跃连接，并发编译各服务片段，
//! 合并为统一的优先级视图；单个服务失败不影响其余服务

use futures::future::join_all;
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    error::AppError,
    integrations::ExecutorRegistry,
    models::command::ServiceKind,
    models::context::{
        Communications, ContextSummary, ProjectContext, ServiceFragment, ServiceStatus,
    },
    repository::ConnectionStore,
};

pub struct ContextCompiler {
    connections: Arc<dyn ConnectionStore>,
    registry: Arc<ExecutorRegistry>,
}

impl ContextCompiler {
    pub fn new(connections: Arc<dyn ConnectionStore>, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            connections,
            registry,
        }
    }

    /// 编译项目上下文
    ///
    /// 各服务并发编译；编译抛错的服务产生 status=error 的占位条目。
    /// 连接记录里无法识别的服务名被静默跳过。
    pub async fn compile_project_context(&self, user_id: &str) -> Result<ProjectContext, AppError> {
        let connections = self.connections.list_active(user_id).await?;

        let fragment_futures = connections.into_iter().filter_map(|conn| {
            let kind = ServiceKind::from_str(&conn.service).ok()?;
            let executor = self.registry.get(kind)?;
            let connection_id = conn.connection_id;

            Some(async move {
                match executor.compile_fragment(&connection_id).await {
                    Ok(fragment) => fragment,
                    Err(e) => {
                        tracing::error!(
                            service = %kind,
                            error = %e,
                            "Failed to compile context for service"
                        );
                        ServiceFragment::failed(kind.as_str(), e.to_string())
                    }
                }
            })
        });

        let fragments = join_all(fragment_futures).await;

        Ok(merge_fragments(user_id, fragments))
    }

    /// 渲染 markdown 报告
    ///
    /// 模板是其他系统可能松散解析的稳定契约：
    /// 小节标题与占位文案必须逐字节不变。
    pub async fn generate_markdown(&self, user_id: &str) -> Result<String, AppError> {
        let context = self.compile_project_context(user_id).await?;
        Ok(render_markdown(&context))
    }
}

/// 合并各服务片段
pub fn merge_fragments(user_id: &str, fragments: Vec<ServiceFragment>) -> ProjectContext {
    let mut merged = ProjectContext::empty(user_id);

    for fragment in fragments {
        merged.services.push(ServiceStatus {
            name: fragment.service,
            status: fragment.status,
            last_sync: fragment.last_sync,
            item_count: fragment.item_count,
            error: fragment.error,
        });

        // 通信类：计数求和，列表拼接
        if let Some(communications) = fragment.communications {
            let target = merged
                .communications
                .get_or_insert_with(Communications::default);
            target.unread_count += communications.unread_count;
            target.urgent_items.extend(communications.urgent_items);
            target.recent_activity.extend(communications.recent_activity);
        }

        // 项目列表拼接
        if let Some(projects) = fragment.projects {
            merged.projects.get_or_insert_with(Vec::new).extend(projects);
        }

        // 财务数据后写覆盖（预期最多一个财务类服务）
        if let Some(financials) = fragment.financials {
            merged.financials = Some(financials);
        }

        merged.urgent_items.extend(fragment.urgent_items);
    }

    merged.summary = ContextSummary {
        total_items: merged.services.iter().map(|s| s.item_count).sum(),
        urgent_items: merged.urgent_items.len() as u64,
        recent_activity: merged
            .communications
            .as_ref()
            .map(|c| c.recent_activity.len() as u64)
            .unwrap_or(0),
    };

    // 稳定排序：high > medium > low，同级保持输入顺序
    merged
        .urgent_items
        .sort_by(|a, b| b.priority.rank().cmp(&a.priority.rank()));

    merged
}

/// 渲染固定小节的 markdown 报告
pub fn render_markdown(context: &ProjectContext) -> String {
    let urgent_section = if context.urgent_items.is_empty() {
        "No urgent items".to_string()
    } else {
        context
            .urgent_items
            .iter()
            .map(|item| {
                let due = item
                    .due_date
                    .as_ref()
                    .map(|d| format!(" (Due: {})", d))
                    .unwrap_or_default();
                format!("- **{}**: {}{}", item.title, item.description, due)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let projects_section = match &context.projects {
        Some(projects) if !projects.is_empty() => projects
            .iter()
            .map(|p| {
                let deadline = p
                    .deadline
                    .as_ref()
                    .map(|d| format!(", deadline {}", d))
                    .unwrap_or_default();
                format!("- **{}**: {}% complete{}", p.name, p.completion, deadline)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "No active projects".to_string(),
    };

    let communications_section = match &context.communications {
        Some(communications) => format!(
            "- {} unread emails\n- {} urgent items requiring response",
            communications.unread_count,
            communications.urgent_items.len()
        ),
        None => "- No communication data available".to_string(),
    };

    let financials_section = match &context.financials {
        Some(financials) => format!(
            "- Outstanding Receivables: ${:.2}\n- Outstanding Payables: ${:.2}\n- Overdue Amount: ${:.2} ({} invoices)",
            financials.total_receivables,
            financials.total_payables,
            financials.overdue_amount,
            financials.overdue_count
        ),
        None => "- No financial data available".to_string(),
    };

    let services_section = context
        .services
        .iter()
        .map(|s| {
            format!(
                "- **{}**: {} ({} items, last sync: {})",
                s.name, s.status, s.item_count, s.last_sync
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let timestamp = context.timestamp.to_rfc3339();

    format!(
        "# Studio Status - {timestamp}\n\n\
         ## 🚨 Immediate Attention Required\n{urgent_section}\n\n\
         ## 📋 Active Projects\n{projects_section}\n\n\
         ## Communications Summary\n{communications_section}\n\n\
         ## 💰 Financial Overview\n{financials_section}\n\n\
         ## Service Status\n{services_section}\n\n\
         ---\n\
         *Last updated: {timestamp}*\n\
         *Total items tracked: {total_items}*",
        timestamp = timestamp,
        urgent_section = urgent_section,
        projects_section = projects_section,
        communications_section = communications_section,
        financials_section = financials_section,
        services_section = services_section,
        total_items = context.summary.total_items,
    )
}
