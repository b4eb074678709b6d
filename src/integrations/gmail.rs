//! Gmail 执行器
//! 通过令牌代理读取邮件、发送邮件并汇总邮箱状态

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{
    param_str, param_u32_or, ActionOutcome, ExecutorError, ProxyMethod, ServiceExecutor,
    TokenBroker,
};
use crate::models::command::ServiceKind;
use crate::models::context::{ActivityItem, Communications, Priority, ServiceFragment, UrgentItem};

/// 规整后的邮件条目
#[derive(Debug, Clone, Serialize)]
pub struct Email {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub date: DateTime<Utc>,
    pub snippet: String,
    pub read: bool,
    pub labels: Vec<String>,
}

/// 邮箱统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailStats {
    /// 总量需要额外的 API 调用，保持为 0
    pub total: u64,
    pub unread: u64,
    pub urgent: u64,
    pub today_count: u64,
}

/// 列表响应（只关心消息 ID）
#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// 详情响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: MessagePayload,
    #[serde(default)]
    internal_date: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<MessageHeader>,
}

#[derive(Debug, Deserialize)]
struct MessageHeader {
    name: String,
    value: String,
}

impl MessageDetail {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

const URGENT_QUERY: &str = "is:unread (urgent OR ASAP OR priority)";

pub struct GmailExecutor {
    broker: Arc<dyn TokenBroker>,
}

impl GmailExecutor {
    pub fn new(broker: Arc<dyn TokenBroker>) -> Self {
        Self { broker }
    }

    /// 拉取邮件列表并补全每封邮件的详情
    pub async fn get_emails(
        &self,
        connection_id: &str,
        max_results: u32,
        query: Option<&str>,
    ) -> Result<Vec<Email>, ExecutorError> {
        let mut endpoint = format!("/gmail/v1/users/me/messages?maxResults={}", max_results);
        if let Some(query) = query {
            endpoint.push_str(&format!("&q={}", urlencoding::encode(query)));
        }

        let list: MessageList = parse(
            self.broker
                .proxy_call(
                    ServiceKind::Gmail,
                    connection_id,
                    &endpoint,
                    ProxyMethod::Get,
                    None,
                )
                .await?,
        )?;

        if list.messages.is_empty() {
            return Ok(Vec::new());
        }

        // 详情查询并发执行，总时延受限于最慢的一次调用
        let details = try_join_all(
            list.messages
                .iter()
                .map(|message| self.get_email_detail(connection_id, &message.id)),
        )
        .await?;

        let emails = list
            .messages
            .into_iter()
            .zip(details)
            .map(|(message, detail)| Email {
                id: message.id,
                subject: detail.header("Subject").unwrap_or("No Subject").to_string(),
                from: detail.header("From").unwrap_or("Unknown Sender").to_string(),
                date: parse_internal_date(&detail.internal_date),
                read: !detail.label_ids.iter().any(|l| l == "UNREAD"),
                snippet: detail.snippet,
                labels: detail.label_ids,
            })
            .collect();

        Ok(emails)
    }

    pub async fn get_unread_emails(&self, connection_id: &str) -> Result<Vec<Email>, ExecutorError> {
        self.get_emails(connection_id, 20, Some("is:unread")).await
    }

    pub async fn get_urgent_emails(&self, connection_id: &str) -> Result<Vec<Email>, ExecutorError> {
        self.get_emails(connection_id, 10, Some(URGENT_QUERY)).await
    }

    async fn get_email_detail(
        &self,
        connection_id: &str,
        message_id: &str,
    ) -> Result<MessageDetail, ExecutorError> {
        parse(
            self.broker
                .proxy_call(
                    ServiceKind::Gmail,
                    connection_id,
                    &format!("/gmail/v1/users/me/messages/{}", message_id),
                    ProxyMethod::Get,
                    None,
                )
                .await?,
        )
    }

    /// 发送邮件，返回是否发送成功（失败不抛错）
    pub async fn send_email(
        &self,
        connection_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> bool {
        let message = format!("To: {}\nSubject: {}\n\n{}", to, subject, body);
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(message);

        let result = self
            .broker
            .proxy_call(
                ServiceKind::Gmail,
                connection_id,
                "/gmail/v1/users/me/messages/send",
                ProxyMethod::Post,
                Some(json!({ "raw": raw })),
            )
            .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to send email");
                false
            }
        }
    }

    /// 邮箱统计，失败时退化为全零
    pub async fn get_email_stats(&self, connection_id: &str) -> EmailStats {
        let today_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| Utc.from_utc_datetime(&t).timestamp())
            .unwrap_or_default();
        let today_query = format!("after:{}", today_start);

        let stats = tokio::try_join!(
            self.get_unread_emails(connection_id),
            self.get_urgent_emails(connection_id),
            self.get_emails(connection_id, 50, Some(&today_query)),
        );

        match stats {
            Ok((unread, urgent, today)) => EmailStats {
                total: 0,
                unread: unread.len() as u64,
                urgent: urgent.len() as u64,
                today_count: today.len() as u64,
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to get email stats");
                EmailStats::default()
            }
        }
    }
}

#[async_trait]
impl ServiceExecutor for GmailExecutor {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Gmail
    }

    fn actions(&self) -> &'static [&'static str] {
        &["send_email", "get_emails", "get_unread_emails", "get_email_stats"]
    }

    async fn execute(
        &self,
        connection_id: &str,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<ActionOutcome, ExecutorError> {
        match action {
            "send_email" => {
                let (to, subject, body) = match (
                    param_str(params, "to"),
                    param_str(params, "subject"),
                    param_str(params, "body"),
                ) {
                    (Some(to), Some(subject), Some(body)) => (to, subject, body),
                    _ => return Err(ExecutorError::MissingParameters("to, subject, body")),
                };

                let sent = self.send_email(connection_id, to, subject, body).await;
                let data = json!({ "sent": sent, "to": to, "subject": subject });

                if sent {
                    Ok(ActionOutcome::Ok(data))
                } else {
                    Ok(ActionOutcome::Rejected {
                        data,
                        message: "Failed to send email".to_string(),
                    })
                }
            }

            "get_emails" => {
                let max_results = param_u32_or(params, "maxResults", 10);
                let query = param_str(params, "query");
                let emails = self.get_emails(connection_id, max_results, query).await?;
                Ok(ActionOutcome::Ok(json!({
                    "emails": emails,
                    "count": emails.len()
                })))
            }

            "get_unread_emails" => {
                let emails = self.get_unread_emails(connection_id).await?;
                Ok(ActionOutcome::Ok(json!({
                    "emails": emails,
                    "count": emails.len()
                })))
            }

            "get_email_stats" => {
                let stats = self.get_email_stats(connection_id).await;
                Ok(ActionOutcome::Ok(serde_json::to_value(stats).unwrap_or_default()))
            }

            // 分发器先查动作表，这里只兜底
            _ => Err(ExecutorError::Upstream(format!(
                "Unsupported Gmail action: {}",
                action
            ))),
        }
    }

    async fn compile_fragment(&self, connection_id: &str) -> Result<ServiceFragment, ExecutorError> {
        let result = tokio::try_join!(
            async { Ok::<_, ExecutorError>(self.get_email_stats(connection_id).await) },
            self.get_urgent_emails(connection_id),
            self.get_emails(connection_id, 10, None),
        );

        let (stats, urgent, recent) = result
            .map_err(|e| ExecutorError::Upstream(format!("Gmail context compilation failed: {}", e)))?;

        Ok(ServiceFragment {
            service: "gmail".to_string(),
            status: "active".to_string(),
            last_sync: Utc::now().to_rfc3339(),
            item_count: stats.unread,
            error: None,
            communications: Some(Communications {
                unread_count: stats.unread,
                urgent_items: urgent
                    .iter()
                    .take(5)
                    .map(|email| UrgentItem {
                        title: email.subject.clone(),
                        description: format!("From: {}", email.from),
                        priority: Priority::High,
                        source: "gmail".to_string(),
                        due_date: None,
                    })
                    .collect(),
                recent_activity: recent
                    .iter()
                    .take(10)
                    .map(|email| ActivityItem {
                        title: email.subject.clone(),
                        description: format!("From: {}", email.from),
                        timestamp: email.date.to_rfc3339(),
                        source: "gmail".to_string(),
                    })
                    .collect(),
            }),
            projects: None,
            financials: None,
            urgent_items: urgent
                .iter()
                .take(3)
                .map(|email| UrgentItem {
                    title: format!("Email: {}", email.subject),
                    description: format!("From {}", email.from),
                    priority: Priority::High,
                    source: "gmail".to_string(),
                    due_date: None,
                })
                .collect(),
        })
    }
}

/// 毫秒级 Unix 时间戳字符串转 DateTime
fn parse_internal_date(internal_date: &str) -> DateTime<Utc> {
    internal_date
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ExecutorError> {
    serde_json::from_value(value)
        .map_err(|e| ExecutorError::Upstream(format!("Failed to fetch emails from Gmail: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_internal_date() {
        let date = parse_internal_date("1754000000000");
        assert_eq!(date.timestamp(), 1754000000);
    }

    #[test]
    fn test_parse_internal_date_invalid_falls_back_to_now() {
        let before = Utc::now();
        let date = parse_internal_date("not-a-number");
        assert!(date >= before);
    }

    #[test]
    fn test_message_detail_header_lookup_case_insensitive() {
        let detail: MessageDetail = serde_json::from_value(json!({
            "labelIds": ["UNREAD"],
            "snippet": "hello",
            "payload": {
                "headers": [
                    {"name": "Subject", "value": "Quarterly review"},
                    {"name": "FROM", "value": "alice@example.com"}
                ]
            },
            "internalDate": "1754000000000"
        }))
        .unwrap();

        assert_eq!(detail.header("subject"), Some("Quarterly review"));
        assert_eq!(detail.header("from"), Some("alice@example.com"));
        assert_eq!(detail.header("cc"), None);
    }

    #[test]
    fn test_message_list_tolerates_missing_messages() {
        let list: MessageList = serde_json::from_value(json!({"resultSizeEstimate": 0})).unwrap();
        assert!(list.messages.is_empty());
    }
}
