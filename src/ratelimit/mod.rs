//! 请求限流
//! 按标识符的固定窗口计数，存储后端可插拔（进程内 Map 或外部原子计数器）

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::RateLimitRule;

/// 限流判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// 窗口重置时间（Unix 秒）
    pub reset: i64,
}

/// 存储后端错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// 限流计数存储
///
/// 进程内实现只对单实例部署正确；多实例部署必须换成共享的
/// 外部原子计数器实现（同一个 trait）。
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// 对标识符记一次请求，返回判定结果
    async fn hit(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, StoreError>;
}

/// 单个标识符的窗口计数
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    /// 窗口重置时间（Unix 毫秒）
    reset_at_ms: i64,
}

/// 进程内限流存储
#[derive(Default)]
pub struct InMemoryStore {
    counters: Mutex<HashMap<String, WindowCounter>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn hit(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut counters = self.counters.lock().await;

        // 仅保留未过期的窗口计数
        let current = counters
            .get(key)
            .copied()
            .filter(|c| now_ms <= c.reset_at_ms);

        match current {
            // 首次请求或窗口已过期：重置计数
            None => {
                let reset_at_ms = now_ms + window.as_millis() as i64;
                counters.insert(
                    key.to_string(),
                    WindowCounter {
                        count: 1,
                        reset_at_ms,
                    },
                );
                Ok(RateLimitDecision {
                    success: true,
                    limit: max_requests,
                    remaining: max_requests.saturating_sub(1),
                    reset: reset_at_ms / 1000,
                })
            }
            Some(current) => {
                // 已到上限：拒绝且不再递增，窗口内成功次数恰为 max_requests
                if current.count >= max_requests {
                    return Ok(RateLimitDecision {
                        success: false,
                        limit: max_requests,
                        remaining: 0,
                        reset: current.reset_at_ms / 1000,
                    });
                }

                let count = current.count + 1;
                counters.insert(
                    key.to_string(),
                    WindowCounter {
                        count,
                        reset_at_ms: current.reset_at_ms,
                    },
                );
                Ok(RateLimitDecision {
                    success: true,
                    limit: max_requests,
                    remaining: max_requests.saturating_sub(count),
                    reset: current.reset_at_ms / 1000,
                })
            }
        }
    }
}

/// 解析窗口描述串（"5s"/"30m"/"1h"/"1d"），无法识别的单位按 1 小时处理
pub fn parse_window(window: &str) -> Duration {
    let default = Duration::from_secs(3600);

    if window.len() < 2 {
        return default;
    }

    let (value, unit) = window.split_at(window.len() - 1);
    let value: u64 = match value.parse() {
        Ok(v) => v,
        Err(_) => return default,
    };

    match unit {
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        "d" => Duration::from_secs(value * 86400),
        _ => default,
    }
}

/// 限流器
///
/// 失败策略为放行：存储异常绝不能阻断正常流量。
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    bypass_token: Option<String>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, bypass_token: Option<String>) -> Self {
        Self {
            store,
            bypass_token,
        }
    }

    /// 检查一次请求
    ///
    /// `scope` 用于命名空间隔离（如 ":webhook"、":gmail"），
    /// 不同端点/服务的配额互不影响。
    pub async fn check(
        &self,
        headers: &HeaderMap,
        scope: &str,
        rule: &RateLimitRule,
    ) -> RateLimitDecision {
        // 受信内部调用方旁路
        if let Some(expected) = &self.bypass_token {
            let provided = headers
                .get("x-bypass-token")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !expected.is_empty() && provided == expected {
                return RateLimitDecision {
                    success: true,
                    limit: rule.requests,
                    remaining: rule.requests,
                    reset: Utc::now().timestamp(),
                };
            }
        }

        let identifier = format!("{}{}", derive_identifier(headers), scope);
        let window = parse_window(&rule.window);

        match self.store.hit(&identifier, rule.requests, window).await {
            Ok(decision) => {
                if !decision.success {
                    metrics::counter!("rate_limit_rejections_total").increment(1);
                    tracing::warn!(identifier = %identifier, "Rate limit exceeded");
                }
                decision
            }
            Err(e) => {
                // 限流机制自身故障时放行
                tracing::warn!(error = %e, "Rate limit store failed, allowing request");
                RateLimitDecision {
                    success: true,
                    limit: rule.requests,
                    remaining: rule.requests,
                    reset: Utc::now().timestamp(),
                }
            }
        }
    }
}

/// 推导限流标识符
/// 优先显式身份头，其次代理转发 IP，最后落到 "unknown"
pub fn derive_identifier(headers: &HeaderMap) -> String {
    if let Some(user_id) = headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        if !user_id.is_empty() {
            return user_id.to_string();
        }
    }

    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    "unknown".to_string()
}

/// 把限流判定写入响应头
pub fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(
        "x-ratelimit-limit",
        HeaderValue::from_str(&decision.limit.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from_str(&decision.remaining.to_string())
            .unwrap_or(HeaderValue::from_static("0")),
    );
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from_str(&decision.reset.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );
}
