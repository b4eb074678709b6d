//! 命令信封模型
//! 入站命令、分发结果与 Webhook 响应

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// 支持的第三方服务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Gmail,
    Asana,
    Xero,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Gmail, ServiceKind::Asana, ServiceKind::Xero];

    /// 路由/存储用的小写名
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Gmail => "gmail",
            ServiceKind::Asana => "asana",
            ServiceKind::Xero => "xero",
        }
    }

    /// 错误消息用的显示名
    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceKind::Gmail => "Gmail",
            ServiceKind::Asana => "Asana",
            ServiceKind::Xero => "Xero",
        }
    }
}

impl FromStr for ServiceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gmail" => Ok(ServiceKind::Gmail),
            "asana" => Ok(ServiceKind::Asana),
            "xero" => Ok(ServiceKind::Xero),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 外部代理提交的命令
///
/// 所有字段都带默认值反序列化：缺字段属于结构非法（HTTP 400），
/// 而不是 JSON 解析失败（HTTP 500）。
/// `request_id` 由服务端生成，客户端提交的值会被忽略，
/// 保证审计关联 ID 的唯一性。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AgentCommand {
    #[serde(default)]
    #[validate(length(min = 1, message = "userId must not be empty"))]
    pub user_id: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "service must not be empty"))]
    pub service: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "action must not be empty"))]
    pub action: String,

    #[serde(default)]
    #[validate(required(message = "parameters must be present"))]
    pub parameters: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AgentCommand {
    /// 结构校验：四个必填字段均须存在且非空
    pub fn is_structurally_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// 参数表（结构校验通过后必然存在）
    pub fn params(&self) -> &Map<String, Value> {
        static EMPTY: once_cell::sync::Lazy<Map<String, Value>> =
            once_cell::sync::Lazy::new(Map::new);
        self.parameters.as_ref().unwrap_or(&EMPTY)
    }
}

/// 命令执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
    Pending,
    Cancelled,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Success => "success",
            CommandStatus::Error => "error",
            CommandStatus::Pending => "pending",
            CommandStatus::Cancelled => "cancelled",
        }
    }
}

/// 分发结果
/// `data` 与 `error` 依 `status` 恰有一个有意义
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command_id: String,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(command_id: impl Into<String>, data: Value) -> Self {
        Self {
            command_id: command_id.into(),
            status: CommandStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            status: CommandStatus::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    /// 上游报告了失败但调用本身没有抛错（例如 send_email 返回 sent=false）
    pub fn rejected(command_id: impl Into<String>, data: Value, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            status: CommandStatus::Error,
            data: Some(data),
            error: Some(message.into()),
        }
    }
}

/// Webhook 响应信封
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub command_id: String,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CommandResult> for WebhookResponse {
    fn from(result: CommandResult) -> Self {
        Self {
            success: result.status == CommandStatus::Success,
            command_id: result.command_id,
            status: result.status,
            result: result.data,
            error: result.error,
        }
    }
}
