//! 第三方服务执行器
//! 每个服务一个执行器实现，经注册表按服务枚举查找；
//! 所有上游调用都走令牌代理，本系统不接触原始凭据

pub mod asana;
pub mod broker;
pub mod gmail;
pub mod xero;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::models::command::ServiceKind;
use crate::models::context::ServiceFragment;
pub use broker::{BrokerError, HttpTokenBroker, ProxyMethod, TokenBroker};

/// 执行器错误
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// 动作缺少多个必填参数（消息列出参数名）
    #[error("Missing required parameters: {0}")]
    MissingParameters(&'static str),

    /// 动作缺少单个必填参数
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// 上游调用或数据处理失败
    #[error("{0}")]
    Upstream(String),
}

/// 动作执行结果
#[derive(Debug)]
pub enum ActionOutcome {
    /// 动作成功，携带业务数据
    Ok(Value),
    /// 调用未抛错但上游报告了失败（如 send_email 的 sent=false）
    Rejected { data: Value, message: String },
}

/// 服务执行器
///
/// 动作表是静态数据：分发器先查表再执行，
/// 未知动作是一次查找未命中而不是控制流穿透。
#[async_trait]
pub trait ServiceExecutor: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// 该服务支持的全部动作名
    fn actions(&self) -> &'static [&'static str];

    /// 执行一个动作；动作自行校验必填参数
    async fn execute(
        &self,
        connection_id: &str,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<ActionOutcome, ExecutorError>;

    /// 为上下文编译生成本服务的片段
    async fn compile_fragment(&self, connection_id: &str) -> Result<ServiceFragment, ExecutorError>;
}

/// 执行器注册表（服务枚举 → 执行器）
pub struct ExecutorRegistry {
    executors: HashMap<ServiceKind, Arc<dyn ServiceExecutor>>,
}

impl ExecutorRegistry {
    /// 创建注册表并在启动时校验动作表
    pub fn new(broker: Arc<dyn TokenBroker>, receivables_alert_threshold: f64) -> Self {
        let executors: Vec<Arc<dyn ServiceExecutor>> = vec![
            Arc::new(gmail::GmailExecutor::new(broker.clone())),
            Arc::new(asana::AsanaExecutor::new(broker.clone())),
            Arc::new(xero::XeroExecutor::new(broker, receivables_alert_threshold)),
        ];

        let mut map = HashMap::new();
        for executor in executors {
            let actions = executor.actions();
            assert!(
                !actions.is_empty(),
                "executor for {} declares no actions",
                executor.kind()
            );

            let unique: HashSet<_> = actions.iter().collect();
            assert_eq!(
                unique.len(),
                actions.len(),
                "executor for {} declares duplicate actions",
                executor.kind()
            );

            let existing = map.insert(executor.kind(), executor);
            assert!(existing.is_none(), "duplicate executor registration");
        }

        Self { executors: map }
    }

    /// 用外部提供的执行器构建注册表（测试注入用）
    pub fn with_executors(executors: Vec<Arc<dyn ServiceExecutor>>) -> Self {
        let mut map = HashMap::new();
        for executor in executors {
            map.insert(executor.kind(), executor);
        }
        Self { executors: map }
    }

    pub fn get(&self, kind: ServiceKind) -> Option<Arc<dyn ServiceExecutor>> {
        self.executors.get(&kind).cloned()
    }
}

/// 从参数表中取非空字符串
pub(crate) fn param_str<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// 从参数表中取正整数，缺省时用默认值
pub(crate) fn param_u32_or(params: &Map<String, Value>, key: &str, default: u32) -> u32 {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::context::ServiceFragment;

    struct NoopBroker;

    #[async_trait]
    impl TokenBroker for NoopBroker {
        async fn proxy_call(
            &self,
            service: ServiceKind,
            _connection_id: &str,
            _endpoint: &str,
            _method: ProxyMethod,
            _body: Option<Value>,
        ) -> Result<Value, BrokerError> {
            Err(BrokerError::Status {
                service: service.as_str(),
                status: 503,
            })
        }
    }

    #[test]
    fn test_registry_covers_all_services() {
        let registry = ExecutorRegistry::new(Arc::new(NoopBroker), 10000.0);

        for kind in ServiceKind::ALL {
            let executor = registry.get(kind).expect("executor registered");
            assert_eq!(executor.kind(), kind);
            assert!(!executor.actions().is_empty());
        }
    }

    #[test]
    fn test_registry_action_tables() {
        let registry = ExecutorRegistry::new(Arc::new(NoopBroker), 10000.0);

        let gmail = registry.get(ServiceKind::Gmail).unwrap();
        assert!(gmail.actions().contains(&"send_email"));
        assert!(gmail.actions().contains(&"get_unread_emails"));

        let asana = registry.get(ServiceKind::Asana).unwrap();
        assert!(asana.actions().contains(&"get_tasks"));
        assert!(asana.actions().contains(&"create_task"));

        let xero = registry.get(ServiceKind::Xero).unwrap();
        assert!(xero.actions().contains(&"get_financial_summary"));
        assert!(xero.actions().contains(&"get_overdue_invoices"));
    }

    #[test]
    fn test_param_helpers() {
        let mut params = Map::new();
        params.insert("to".to_string(), Value::String("a@b.c".to_string()));
        params.insert("empty".to_string(), Value::String(String::new()));
        params.insert("maxResults".to_string(), Value::from(5u64));

        assert_eq!(param_str(&params, "to"), Some("a@b.c"));
        assert_eq!(param_str(&params, "empty"), None);
        assert_eq!(param_str(&params, "missing"), None);
        assert_eq!(param_u32_or(&params, "maxResults", 10), 5);
        assert_eq!(param_u32_or(&params, "missing", 10), 10);
    }

    #[test]
    fn test_failed_fragment_shape() {
        let fragment = ServiceFragment::failed("gmail", "Gmail context compilation failed");
        assert_eq!(fragment.service, "gmail");
        assert_eq!(fragment.status, "error");
    }
}
