//! Asana 执行器
//! 通过令牌代理查询任务/项目并创建任务

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{param_str, ActionOutcome, ExecutorError, ProxyMethod, ServiceExecutor, TokenBroker};
use crate::models::command::ServiceKind;
use crate::models::context::{Priority, ProjectEntry, ServiceFragment, UrgentItem};

const TASK_OPT_FIELDS: &str =
    "name,completed,due_date,assignee.name,projects.name,tags.name,created_at,modified_at";

/// Asana 任务
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsanaTask {
    pub gid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub assignee: Option<AsanaRef>,
    #[serde(default)]
    pub projects: Vec<AsanaRef>,
    #[serde(default)]
    pub tags: Vec<AsanaRef>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// Asana 项目
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsanaProject {
    pub gid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsanaRef {
    pub gid: String,
    #[serde(default)]
    pub name: String,
}

/// 任务统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: u64,
    pub completed: u64,
    pub overdue: u64,
    pub due_today: u64,
    pub upcoming: u64,
}

/// Asana 的数据信封：{"data": ...}
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    #[serde(default)]
    data: Option<T>,
}

pub struct AsanaExecutor {
    broker: Arc<dyn TokenBroker>,
}

impl AsanaExecutor {
    pub fn new(broker: Arc<dyn TokenBroker>) -> Self {
        Self { broker }
    }

    async fn get(&self, connection_id: &str, endpoint: &str) -> Result<Value, ExecutorError> {
        Ok(self
            .broker
            .proxy_call(
                ServiceKind::Asana,
                connection_id,
                endpoint,
                ProxyMethod::Get,
                None,
            )
            .await?)
    }

    /// 当前用户名下的任务；失败时返回空列表而不是报错
    pub async fn get_my_tasks(&self, connection_id: &str) -> Vec<AsanaTask> {
        let result: Result<Vec<AsanaTask>, ExecutorError> = async {
            let me: DataEnvelope<AsanaRef> =
                parse(self.get(connection_id, "/api/1.0/users/me").await?)?;
            let user_gid = me.data.map(|r| r.gid).unwrap_or_default();

            let endpoint = format!(
                "/api/1.0/tasks?assignee={}&completed_since=now&opt_fields={}",
                user_gid, TASK_OPT_FIELDS
            );
            let tasks: DataEnvelope<Vec<AsanaTask>> = parse(self.get(connection_id, &endpoint).await?)?;
            Ok(tasks.data.unwrap_or_default())
        }
        .await;

        match result {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch my Asana tasks");
                Vec::new()
            }
        }
    }

    /// 未来 7 天内到期的任务；失败时返回空列表
    pub async fn get_upcoming_tasks(&self, connection_id: &str) -> Vec<AsanaTask> {
        let horizon = (Utc::now() + Duration::days(7)).date_naive().to_string();
        let endpoint = format!(
            "/api/1.0/tasks?due_date.before={}&completed_since=now&opt_fields={}",
            horizon, TASK_OPT_FIELDS
        );

        let result: Result<Vec<AsanaTask>, ExecutorError> = async {
            let tasks: DataEnvelope<Vec<AsanaTask>> = parse(self.get(connection_id, &endpoint).await?)?;
            Ok(tasks.data.unwrap_or_default())
        }
        .await;

        match result {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch upcoming Asana tasks");
                Vec::new()
            }
        }
    }

    /// 项目列表；失败时报错
    pub async fn get_projects(&self, connection_id: &str) -> Result<Vec<AsanaProject>, ExecutorError> {
        let endpoint =
            "/api/1.0/projects?limit=20&opt_fields=name,color,completed,current_status,due_date,team.name";
        let projects: DataEnvelope<Vec<AsanaProject>> =
            parse(self.get(connection_id, endpoint).await?)?;
        Ok(projects.data.unwrap_or_default())
    }

    /// 任务统计，失败时退化为全零
    pub async fn get_task_stats(&self, connection_id: &str) -> TaskStats {
        let (my_tasks, upcoming) = tokio::join!(
            self.get_my_tasks(connection_id),
            self.get_upcoming_tasks(connection_id)
        );

        compute_task_stats(&my_tasks, upcoming.len() as u64)
    }

    /// 创建任务；失败时返回 None
    pub async fn create_task(
        &self,
        connection_id: &str,
        name: &str,
        project_gid: Option<&str>,
        due_date: Option<&str>,
        notes: Option<&str>,
    ) -> Option<AsanaTask> {
        let mut task_data = json!({ "name": name });
        if let Some(notes) = notes {
            task_data["notes"] = json!(notes);
        }
        if let Some(project_gid) = project_gid {
            task_data["projects"] = json!([project_gid]);
        }
        if let Some(due_date) = due_date {
            task_data["due_date"] = json!(due_date);
        }

        let result = self
            .broker
            .proxy_call(
                ServiceKind::Asana,
                connection_id,
                "/api/1.0/tasks",
                ProxyMethod::Post,
                Some(json!({ "data": task_data })),
            )
            .await;

        match result {
            Ok(value) => parse::<DataEnvelope<AsanaTask>>(value)
                .ok()
                .and_then(|envelope| envelope.data),
            Err(e) => {
                tracing::error!(error = %e, "Failed to create Asana task");
                None
            }
        }
    }
}

#[async_trait]
impl ServiceExecutor for AsanaExecutor {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Asana
    }

    fn actions(&self) -> &'static [&'static str] {
        &[
            "get_tasks",
            "create_task",
            "get_task_stats",
            "get_upcoming_tasks",
            "get_projects",
        ]
    }

    async fn execute(
        &self,
        connection_id: &str,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<ActionOutcome, ExecutorError> {
        match action {
            "get_tasks" => {
                let tasks = self.get_my_tasks(connection_id).await;
                Ok(ActionOutcome::Ok(json!({
                    "tasks": tasks,
                    "count": tasks.len()
                })))
            }

            "create_task" => {
                let name = param_str(params, "name")
                    .ok_or(ExecutorError::MissingParameter("name"))?;
                let task = self
                    .create_task(
                        connection_id,
                        name,
                        param_str(params, "project_gid"),
                        param_str(params, "due_date"),
                        param_str(params, "notes"),
                    )
                    .await;

                match task {
                    Some(task) => Ok(ActionOutcome::Ok(json!({
                        "task": task,
                        "created": true
                    }))),
                    None => Ok(ActionOutcome::Rejected {
                        data: json!({ "created": false }),
                        message: "Failed to create task".to_string(),
                    }),
                }
            }

            "get_task_stats" => {
                let stats = self.get_task_stats(connection_id).await;
                Ok(ActionOutcome::Ok(serde_json::to_value(stats).unwrap_or_default()))
            }

            "get_upcoming_tasks" => {
                let tasks = self.get_upcoming_tasks(connection_id).await;
                Ok(ActionOutcome::Ok(json!({
                    "tasks": tasks,
                    "count": tasks.len()
                })))
            }

            "get_projects" => {
                let projects = self.get_projects(connection_id).await?;
                Ok(ActionOutcome::Ok(json!({
                    "projects": projects,
                    "count": projects.len()
                })))
            }

            // 分发器先查动作表，这里只兜底
            _ => Err(ExecutorError::Upstream(format!(
                "Unsupported Asana action: {}",
                action
            ))),
        }
    }

    async fn compile_fragment(&self, connection_id: &str) -> Result<ServiceFragment, ExecutorError> {
        let (stats, upcoming, my_tasks) = tokio::join!(
            self.get_task_stats(connection_id),
            self.get_upcoming_tasks(connection_id),
            self.get_my_tasks(connection_id),
        );

        let incomplete: Vec<&AsanaTask> = my_tasks.iter().filter(|t| !t.completed).collect();

        let mut urgent_items: Vec<UrgentItem> = upcoming
            .iter()
            .take(2)
            .map(|task| UrgentItem {
                title: format!("Task: {}", task.name),
                description: task
                    .due_date
                    .as_ref()
                    .map(|d| format!("Due: {}", d))
                    .unwrap_or_else(|| "No due date".to_string()),
                priority: Priority::Medium,
                source: "asana".to_string(),
                due_date: task.due_date.clone(),
            })
            .collect();

        if stats.overdue > 0 {
            urgent_items.push(UrgentItem {
                title: format!("{} Overdue Tasks", stats.overdue),
                description: "Tasks that are past their due date".to_string(),
                priority: Priority::High,
                source: "asana".to_string(),
                due_date: None,
            });
        }

        Ok(ServiceFragment {
            service: "asana".to_string(),
            status: "active".to_string(),
            last_sync: Utc::now().to_rfc3339(),
            item_count: incomplete.len() as u64,
            error: None,
            communications: None,
            projects: Some(
                incomplete
                    .iter()
                    .map(|task| ProjectEntry {
                        name: task.name.clone(),
                        completion: if task.completed { 100 } else { 0 },
                        deadline: task.due_date.clone(),
                        status: if task.completed {
                            "completed".to_string()
                        } else {
                            "in_progress".to_string()
                        },
                        source: "asana".to_string(),
                    })
                    .collect(),
            ),
            financials: None,
            urgent_items,
        })
    }
}

/// 由任务列表计算统计值；日期串按 YYYY-MM-DD 字典序比较
fn compute_task_stats(my_tasks: &[AsanaTask], upcoming: u64) -> TaskStats {
    let today = Utc::now().date_naive().to_string();

    let completed = my_tasks.iter().filter(|t| t.completed).count() as u64;
    let overdue = my_tasks
        .iter()
        .filter(|t| {
            !t.completed
                && t.due_date
                    .as_ref()
                    .map(|d| d.as_str() < today.as_str())
                    .unwrap_or(false)
        })
        .count() as u64;
    let due_today = my_tasks
        .iter()
        .filter(|t| !t.completed && t.due_date.as_deref() == Some(today.as_str()))
        .count() as u64;

    TaskStats {
        total: my_tasks.len() as u64,
        completed,
        overdue,
        due_today,
        upcoming,
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ExecutorError> {
    serde_json::from_value(value)
        .map_err(|e| ExecutorError::Upstream(format!("Failed to fetch tasks from Asana: {}", e)))
}
