//! 命令分发服务
//! 三段式状态机：结构校验 → 服务路由 → 动作执行
//! 业务失败一律折叠为 status=error 的 CommandResult，不上抛

use std::str::FromStr;
use std::sync::Arc;

use crate::integrations::{ActionOutcome, ExecutorRegistry};
use crate::models::command::{AgentCommand, CommandResult, ServiceKind};

pub struct CommandDispatcher {
    registry: Arc<ExecutorRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self { registry }
    }

    /// 分发一条已通过结构校验的命令
    ///
    /// 未知服务和未知动作都是查找未命中：返回错误结果而不是 HTTP 层失败。
    /// 执行器抛出的任何错误也在这里折叠进结果。
    pub async fn dispatch(&self, command: &AgentCommand) -> CommandResult {
        let command_id = command.request_id.clone().unwrap_or_default();

        // Route: 服务名必须在已知枚举内
        let kind = match ServiceKind::from_str(&command.service) {
            Ok(kind) => kind,
            Err(_) => {
                return CommandResult::error(
                    command_id,
                    format!("Unsupported service: {}", command.service),
                )
            }
        };

        let executor = match self.registry.get(kind) {
            Some(executor) => executor,
            None => {
                return CommandResult::error(
                    command_id,
                    format!("Unsupported service: {}", command.service),
                )
            }
        };

        // Execute: 动作表查找未命中即拒绝
        if !executor.actions().contains(&command.action.as_str()) {
            return CommandResult::error(
                command_id,
                format!(
                    "Unsupported {} action: {}",
                    kind.display_name(),
                    command.action
                ),
            );
        }

        tracing::debug!(
            service = %kind,
            action = %command.action,
            command_id = %command_id,
            "Dispatching command"
        );

        // 用户标识即代理侧连接标识（标准约定）
        let outcome = executor
            .execute(&command.user_id, &command.action, command.params())
            .await;

        match outcome {
            Ok(ActionOutcome::Ok(data)) => CommandResult::success(command_id, data),
            Ok(ActionOutcome::Rejected { data, message }) => {
                CommandResult::rejected(command_id, data, message)
            }
            Err(e) => CommandResult::error(command_id, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{ActionOutcome, ExecutorError, ServiceExecutor};
    use crate::models::command::CommandStatus;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    /// 总是成功的测试执行器
    struct StubExecutor {
        kind: ServiceKind,
    }

    #[async_trait]
    impl ServiceExecutor for StubExecutor {
        fn kind(&self) -> ServiceKind {
            self.kind
        }

        fn actions(&self) -> &'static [&'static str] {
            &["get_tasks", "explode"]
        }

        async fn execute(
            &self,
            _connection_id: &str,
            action: &str,
            _params: &Map<String, Value>,
        ) -> Result<ActionOutcome, ExecutorError> {
            match action {
                "get_tasks" => Ok(ActionOutcome::Ok(json!({"tasks": [], "count": 0}))),
                _ => Err(ExecutorError::Upstream("executor blew up".to_string())),
            }
        }

        async fn compile_fragment(
            &self,
            _connection_id: &str,
        ) -> Result<crate::models::context::ServiceFragment, ExecutorError> {
            Err(ExecutorError::Upstream("not used".to_string()))
        }
    }

    fn dispatcher() -> CommandDispatcher {
        let registry = ExecutorRegistry::with_executors(vec![Arc::new(StubExecutor {
            kind: ServiceKind::Asana,
        })]);
        CommandDispatcher::new(Arc::new(registry))
    }

    fn command(service: &str, action: &str) -> AgentCommand {
        AgentCommand {
            user_id: "u1".to_string(),
            service: service.to_string(),
            action: action.to_string(),
            parameters: Some(Map::new()),
            request_id: Some("cmd-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let result = dispatcher().dispatch(&command("asana", "get_tasks")).await;

        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.command_id, "cmd-1");
        assert_eq!(result.data.unwrap()["count"], 0);
    }

    #[tokio::test]
    async fn test_dispatch_unsupported_service() {
        let result = dispatcher()
            .dispatch(&command("unsupported_service", "get_tasks"))
            .await;

        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(
            result.error.as_deref(),
            Some("Unsupported service: unsupported_service")
        );
    }

    #[tokio::test]
    async fn test_dispatch_unregistered_service() {
        // gmail 是已知服务，但注册表里没有对应执行器
        let result = dispatcher().dispatch(&command("gmail", "get_emails")).await;

        assert_eq!(result.status, CommandStatus::Error);
        assert!(result.error.unwrap().contains("Unsupported service: gmail"));
    }

    #[tokio::test]
    async fn test_dispatch_unsupported_action() {
        let result = dispatcher().dispatch(&command("asana", "delete_everything")).await;

        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(
            result.error.as_deref(),
            Some("Unsupported Asana action: delete_everything")
        );
    }

    #[tokio::test]
    async fn test_dispatch_folds_executor_errors() {
        let result = dispatcher().dispatch(&command("asana", "explode")).await;

        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.error.as_deref(), Some("executor blew up"));
    }
}
