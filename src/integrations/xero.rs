//! Xero 执行器
//! 通过令牌代理查询发票、联系人、账户并汇总财务状况

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{ActionOutcome, ExecutorError, ProxyMethod, ServiceExecutor, TokenBroker};
use crate::models::command::ServiceKind;
use crate::models::context::{Financials, Priority, ServiceFragment, UrgentItem};

/// Xero 发票（上游为 PascalCase 字段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XeroInvoice {
    #[serde(rename = "InvoiceID", default)]
    pub invoice_id: String,
    #[serde(rename = "InvoiceNumber", default)]
    pub invoice_number: String,
    /// ACCREC（应收）或 ACCPAY（应付）
    #[serde(rename = "Type", default)]
    pub invoice_type: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Date", default)]
    pub date: String,
    #[serde(rename = "DueDate", default)]
    pub due_date: String,
    #[serde(rename = "Total", default)]
    pub total: f64,
    #[serde(rename = "AmountDue", default)]
    pub amount_due: f64,
    #[serde(rename = "AmountPaid", default)]
    pub amount_paid: f64,
    #[serde(rename = "Contact", default)]
    pub contact: Option<XeroContactRef>,
    #[serde(rename = "CurrencyCode", default)]
    pub currency_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XeroContactRef {
    #[serde(rename = "ContactID", default)]
    pub contact_id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// Xero 联系人
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XeroContact {
    #[serde(rename = "ContactID", default)]
    pub contact_id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "EmailAddress", default)]
    pub email_address: Option<String>,
    #[serde(rename = "ContactStatus", default)]
    pub contact_status: String,
}

/// Xero 账户
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XeroAccount {
    #[serde(rename = "AccountID", default)]
    pub account_id: String,
    #[serde(rename = "Code", default)]
    pub code: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Type", default)]
    pub account_type: String,
    #[serde(rename = "Class", default)]
    pub class: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// 财务汇总
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSummary {
    pub total_receivables: f64,
    pub total_payables: f64,
    pub overdue_amount: f64,
    pub overdue_count: u64,
    pub total_invoices: u64,
    pub paid_invoices: u64,
}

#[derive(Debug, Deserialize)]
struct InvoicesEnvelope {
    #[serde(rename = "Invoices", default)]
    invoices: Vec<XeroInvoice>,
}

#[derive(Debug, Deserialize)]
struct ContactsEnvelope {
    #[serde(rename = "Contacts", default)]
    contacts: Vec<XeroContact>,
}

#[derive(Debug, Deserialize)]
struct AccountsEnvelope {
    #[serde(rename = "Accounts", default)]
    accounts: Vec<XeroAccount>,
}

pub struct XeroExecutor {
    broker: Arc<dyn TokenBroker>,
    /// 应收账款告警阈值
    receivables_alert_threshold: f64,
}

impl XeroExecutor {
    pub fn new(broker: Arc<dyn TokenBroker>, receivables_alert_threshold: f64) -> Self {
        Self {
            broker,
            receivables_alert_threshold,
        }
    }

    async fn get(&self, connection_id: &str, endpoint: &str) -> Result<Value, ExecutorError> {
        Ok(self
            .broker
            .proxy_call(
                ServiceKind::Xero,
                connection_id,
                endpoint,
                ProxyMethod::Get,
                None,
            )
            .await?)
    }

    /// 发票列表；失败时报错
    pub async fn get_invoices(&self, connection_id: &str) -> Result<Vec<XeroInvoice>, ExecutorError> {
        let envelope: InvoicesEnvelope =
            parse(self.get(connection_id, "/api.xro/2.0/Invoices?page=1&unitdp=2").await?)?;
        Ok(envelope.invoices)
    }

    /// 未结清发票（已授权且仍有应付金额）；失败时返回空列表
    pub async fn get_outstanding_invoices(&self, connection_id: &str) -> Vec<XeroInvoice> {
        let endpoint = format!(
            "/api.xro/2.0/Invoices?where={}&order={}",
            urlencoding::encode(r#"Status="AUTHORISED""#),
            urlencoding::encode("Date DESC"),
        );

        match self.fetch_invoices(connection_id, &endpoint).await {
            Ok(invoices) => invoices
                .into_iter()
                .filter(|invoice| invoice.amount_due > 0.0)
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch outstanding Xero invoices");
                Vec::new()
            }
        }
    }

    /// 逾期发票（已授权、到期日早于今天、仍有应付金额）；失败时返回空列表
    pub async fn get_overdue_invoices(&self, connection_id: &str) -> Vec<XeroInvoice> {
        let today = Utc::now().date_naive().to_string();
        let clause = format!(r#"Status="AUTHORISED" AND DueDate<DateTime({})"#, today);
        let endpoint = format!(
            "/api.xro/2.0/Invoices?where={}",
            urlencoding::encode(&clause)
        );

        match self.fetch_invoices(connection_id, &endpoint).await {
            Ok(invoices) => invoices
                .into_iter()
                .filter(|invoice| invoice.amount_due > 0.0)
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch overdue Xero invoices");
                Vec::new()
            }
        }
    }

    async fn fetch_invoices(
        &self,
        connection_id: &str,
        endpoint: &str,
    ) -> Result<Vec<XeroInvoice>, ExecutorError> {
        let envelope: InvoicesEnvelope = parse(self.get(connection_id, endpoint).await?)?;
        Ok(envelope.invoices)
    }

    /// 联系人列表；失败时报错
    pub async fn get_contacts(&self, connection_id: &str) -> Result<Vec<XeroContact>, ExecutorError> {
        let envelope: ContactsEnvelope =
            parse(self.get(connection_id, "/api.xro/2.0/Contacts?page=1").await?)?;
        Ok(envelope.contacts)
    }

    /// 账户列表；失败时报错
    pub async fn get_accounts(&self, connection_id: &str) -> Result<Vec<XeroAccount>, ExecutorError> {
        let envelope: AccountsEnvelope =
            parse(self.get(connection_id, "/api.xro/2.0/Accounts").await?)?;
        Ok(envelope.accounts)
    }

    /// 财务汇总，失败时退化为全零
    pub async fn get_financial_summary(&self, connection_id: &str) -> FinancialSummary {
        let result = tokio::join!(
            self.get_invoices(connection_id),
            self.get_outstanding_invoices(connection_id),
            self.get_overdue_invoices(connection_id),
        );

        let (all_invoices, _outstanding, overdue) = match result {
            (Ok(all), outstanding, overdue) => (all, outstanding, overdue),
            (Err(e), _, _) => {
                tracing::error!(error = %e, "Failed to get Xero financial summary");
                return FinancialSummary::default();
            }
        };

        compute_financial_summary(&all_invoices, &overdue)
    }
}

#[async_trait]
impl ServiceExecutor for XeroExecutor {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Xero
    }

    fn actions(&self) -> &'static [&'static str] {
        &[
            "get_financial_summary",
            "get_overdue_invoices",
            "get_outstanding_invoices",
            "get_contacts",
            "get_invoices",
            "get_accounts",
        ]
    }

    async fn execute(
        &self,
        connection_id: &str,
        action: &str,
        _params: &Map<String, Value>,
    ) -> Result<ActionOutcome, ExecutorError> {
        match action {
            "get_financial_summary" => {
                let summary = self.get_financial_summary(connection_id).await;
                Ok(ActionOutcome::Ok(serde_json::to_value(summary).unwrap_or_default()))
            }

            "get_overdue_invoices" => {
                let invoices = self.get_overdue_invoices(connection_id).await;
                Ok(ActionOutcome::Ok(json!({
                    "invoices": invoices,
                    "count": invoices.len()
                })))
            }

            "get_outstanding_invoices" => {
                let invoices = self.get_outstanding_invoices(connection_id).await;
                Ok(ActionOutcome::Ok(json!({
                    "invoices": invoices,
                    "count": invoices.len()
                })))
            }

            "get_contacts" => {
                let contacts = self.get_contacts(connection_id).await?;
                Ok(ActionOutcome::Ok(json!({
                    "contacts": contacts,
                    "count": contacts.len()
                })))
            }

            "get_invoices" => {
                let invoices = self.get_invoices(connection_id).await?;
                Ok(ActionOutcome::Ok(json!({
                    "invoices": invoices,
                    "count": invoices.len()
                })))
            }

            "get_accounts" => {
                let accounts = self.get_accounts(connection_id).await?;
                Ok(ActionOutcome::Ok(json!({
                    "accounts": accounts,
                    "count": accounts.len()
                })))
            }

            // 分发器先查动作表，这里只兜底
            _ => Err(ExecutorError::Upstream(format!(
                "Unsupported Xero action: {}",
                action
            ))),
        }
    }

    async fn compile_fragment(&self, connection_id: &str) -> Result<ServiceFragment, ExecutorError> {
        let summary = self.get_financial_summary(connection_id).await;

        let mut urgent_items = Vec::new();

        if summary.overdue_count > 0 {
            urgent_items.push(UrgentItem {
                title: format!("{} Overdue Invoices", summary.overdue_count),
                description: format!("${:.2} in overdue payments", summary.overdue_amount),
                priority: Priority::High,
                source: "xero".to_string(),
                due_date: None,
            });
        }

        if summary.total_receivables > self.receivables_alert_threshold {
            urgent_items.push(UrgentItem {
                title: "High Outstanding Receivables".to_string(),
                description: format!("${:.2} in outstanding payments", summary.total_receivables),
                priority: Priority::Medium,
                source: "xero".to_string(),
                due_date: None,
            });
        }

        Ok(ServiceFragment {
            service: "xero".to_string(),
            status: "active".to_string(),
            last_sync: Utc::now().to_rfc3339(),
            item_count: summary.total_invoices,
            error: None,
            communications: None,
            projects: None,
            financials: Some(Financials {
                total_receivables: summary.total_receivables,
                total_payables: summary.total_payables,
                overdue_amount: summary.overdue_amount,
                overdue_count: summary.overdue_count,
                currency: "USD".to_string(),
            }),
            urgent_items,
        })
    }
}

/// 由发票列表计算财务汇总
fn compute_financial_summary(all_invoices: &[XeroInvoice], overdue: &[XeroInvoice]) -> FinancialSummary {
    let total_receivables = all_invoices
        .iter()
        .filter(|inv| inv.invoice_type == "ACCREC" && inv.amount_due > 0.0)
        .map(|inv| inv.amount_due)
        .sum();

    let total_payables = all_invoices
        .iter()
        .filter(|inv| inv.invoice_type == "ACCPAY" && inv.amount_due > 0.0)
        .map(|inv| inv.amount_due)
        .sum();

    let overdue_amount = overdue.iter().map(|inv| inv.amount_due).sum();
    let paid_invoices = all_invoices
        .iter()
        .filter(|inv| inv.amount_due == 0.0)
        .count() as u64;

    FinancialSummary {
        total_receivables,
        total_payables,
        overdue_amount,
        overdue_count: overdue.len() as u64,
        total_invoices: all_invoices.len() as u64,
        paid_invoices,
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ExecutorError> {
    serde_json::from_value(value)
        .map_err(|e| ExecutorError::Upstream(format!("Failed to fetch invoices from Xero: {}", e)))
}
