//! 上下文编译集成测试
//!
//! 用内存连接存储 + 脚本化代理驱动真实执行器，
//! 覆盖零连接、部分失败、优先级排序与 markdown 渲染

mod common;

use serde_json::json;
use std::sync::Arc;

use common::{InMemoryConnectionStore, ScriptedBroker};
use sylo_gateway::{
    integrations::{ExecutorRegistry, TokenBroker},
    services::ContextCompiler,
};

fn compiler(
    store: Arc<InMemoryConnectionStore>,
    broker: Arc<ScriptedBroker>,
) -> ContextCompiler {
    let registry = Arc::new(ExecutorRegistry::new(
        broker as Arc<dyn TokenBroker>,
        10000.0,
    ));
    ContextCompiler::new(store, registry)
}

/// Asana 正常、Xero 正常的脚本
fn healthy_broker() -> Arc<ScriptedBroker> {
    Arc::new(ScriptedBroker::new(vec![
        (
            "/api/1.0/users/me",
            json!({"data": {"gid": "user-gid", "name": "Me"}}),
        ),
        (
            "/api/1.0/tasks?assignee=",
            json!({"data": [
                {"gid": "t1", "name": "Ship report", "completed": false, "due_date": "2020-01-01"},
                {"gid": "t2", "name": "Done thing", "completed": true}
            ]}),
        ),
        (
            "/api/1.0/tasks?due_date.before=",
            json!({"data": [
                {"gid": "t3", "name": "Upcoming A", "completed": false, "due_date": "2030-01-01"}
            ]}),
        ),
        (
            "/api.xro/2.0/Invoices?page=1",
            json!({"Invoices": [
                {"InvoiceID": "i1", "Type": "ACCREC", "AmountDue": 15000.0},
                {"InvoiceID": "i2", "Type": "ACCPAY", "AmountDue": 200.0}
            ]}),
        ),
        (
            "/api.xro/2.0/Invoices?where=",
            json!({"Invoices": [
                {"InvoiceID": "i3", "Type": "ACCREC", "AmountDue": 500.0}
            ]}),
        ),
    ]))
}

#[tokio::test]
async fn test_zero_connections_yields_empty_context() {
    let store = Arc::new(InMemoryConnectionStore::new());
    let compiler = compiler(store, Arc::new(ScriptedBroker::failing()));

    let context = compiler.compile_project_context("u1").await.unwrap();

    assert!(context.services.is_empty());
    assert!(context.urgent_items.is_empty());
    assert_eq!(context.summary.total_items, 0);
    assert_eq!(context.summary.urgent_items, 0);
    assert_eq!(context.summary.recent_activity, 0);
}

#[tokio::test]
async fn test_unknown_connection_service_silently_skipped() {
    let store = Arc::new(InMemoryConnectionStore::new());
    store.seed("u1", "slack", true).await;
    let compiler = compiler(store, Arc::new(ScriptedBroker::failing()));

    let context = compiler.compile_project_context("u1").await.unwrap();

    // 连 error 条目都不产生
    assert!(context.services.is_empty());
}

#[tokio::test]
async fn test_inactive_connections_not_compiled() {
    let store = Arc::new(InMemoryConnectionStore::new());
    store.seed("u1", "asana", false).await;
    let compiler = compiler(store, healthy_broker());

    let context = compiler.compile_project_context("u1").await.unwrap();
    assert!(context.services.is_empty());
}

#[tokio::test]
async fn test_asana_and_xero_compile_and_merge() {
    let store = Arc::new(InMemoryConnectionStore::new());
    store.seed("u1", "asana", true).await;
    store.seed("u1", "xero", true).await;
    let compiler = compiler(store, healthy_broker());

    let context = compiler.compile_project_context("u1").await.unwrap();

    assert_eq!(context.services.len(), 2);

    // summary.total_items 等于各服务 item_count 之和
    let sum: u64 = context.services.iter().map(|s| s.item_count).sum();
    assert_eq!(context.summary.total_items, sum);

    // Asana：1 个未完成任务 + 1 个逾期聚合项 + 1 个即将到期项
    let asana = context.services.iter().find(|s| s.name == "asana").unwrap();
    assert_eq!(asana.status, "active");
    assert_eq!(asana.item_count, 1);

    let projects = context.projects.as_ref().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].name, "Ship report");
    assert_eq!(projects[0].status, "in_progress");

    // Xero：2 张发票、高应收告警 + 逾期发票告警
    let xero = context.services.iter().find(|s| s.name == "xero").unwrap();
    assert_eq!(xero.item_count, 2);

    let financials = context.financials.as_ref().unwrap();
    assert_eq!(financials.total_receivables, 15000.0);
    assert_eq!(financials.total_payables, 200.0);
    assert_eq!(financials.overdue_count, 1);
    assert_eq!(financials.currency, "USD");

    // 紧急项排序：所有 high 在 medium 之前
    let priorities: Vec<u8> = context.urgent_items.iter().map(|i| i.priority.rank()).collect();
    let mut sorted = priorities.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(priorities, sorted);

    assert!(context
        .urgent_items
        .iter()
        .any(|i| i.title == "1 Overdue Tasks"));
    assert!(context
        .urgent_items
        .iter()
        .any(|i| i.title == "1 Overdue Invoices"));
    assert!(context
        .urgent_items
        .iter()
        .any(|i| i.title == "High Outstanding Receivables"));
}

#[tokio::test]
async fn test_failing_service_does_not_poison_the_rest() {
    let store = Arc::new(InMemoryConnectionStore::new());
    store.seed("u1", "gmail", true).await;
    store.seed("u1", "asana", true).await;
    store.seed("u1", "xero", true).await;

    // 只有 Asana/Xero 的脚本；Gmail 的紧急邮件查询会失败
    let compiler = compiler(store, healthy_broker());

    let context = compiler.compile_project_context("u1").await.unwrap();

    assert_eq!(context.services.len(), 3);

    let gmail = context.services.iter().find(|s| s.name == "gmail").unwrap();
    assert_eq!(gmail.status, "error");
    assert_eq!(gmail.item_count, 0);
    assert!(gmail
        .error
        .as_ref()
        .unwrap()
        .contains("Gmail context compilation failed"));

    // 其余服务不受影响
    let asana = context.services.iter().find(|s| s.name == "asana").unwrap();
    assert_eq!(asana.status, "active");
    let xero = context.services.iter().find(|s| s.name == "xero").unwrap();
    assert_eq!(xero.status, "active");
}

#[tokio::test]
async fn test_markdown_report_stable_sections() {
    let store = Arc::new(InMemoryConnectionStore::new());
    store.seed("u1", "xero", true).await;
    let compiler = compiler(store, healthy_broker());

    let markdown = compiler.generate_markdown("u1").await.unwrap();

    assert!(markdown.starts_with("# Studio Status - "));
    assert!(markdown.contains("## 🚨 Immediate Attention Required"));
    assert!(markdown.contains("## 📋 Active Projects\nNo active projects"));
    assert!(markdown.contains("## Communications Summary\n- No communication data available"));
    assert!(markdown.contains("## 💰 Financial Overview\n- Outstanding Receivables: $15000.00"));
    assert!(markdown.contains("## Service Status\n- **xero**: active (2 items"));
    assert!(markdown.contains("*Total items tracked: 2*"));
}
