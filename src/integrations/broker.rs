//! 令牌代理客户端
//! 代理服务持有 OAuth 令牌并转发已认证的上游调用，
//! 本系统只凭 (服务名, 连接标识) 发起调用，拿到解析后的响应体

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::BrokerConfig;
use crate::models::command::ServiceKind;

/// 代理调用的 HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl ProxyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMethod::Get => "GET",
            ProxyMethod::Post => "POST",
            ProxyMethod::Put => "PUT",
            ProxyMethod::Delete => "DELETE",
        }
    }
}

/// 代理调用错误
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("API call failed for {service}: upstream returned {status}")]
    Status { service: &'static str, status: u16 },

    #[error("API call failed for {service}: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("API call failed for {service}: invalid response body")]
    Decode { service: &'static str },

    #[error("Broker client configuration error: {0}")]
    Config(String),
}

/// 代理调用能力
#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// 经代理向第三方服务发起已认证调用，返回解析后的 JSON 响应体
    async fn proxy_call(
        &self,
        service: ServiceKind,
        connection_id: &str,
        endpoint: &str,
        method: ProxyMethod,
        body: Option<Value>,
    ) -> Result<Value, BrokerError>;
}

/// 基于 HTTP 的代理客户端
pub struct HttpTokenBroker {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpTokenBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BrokerError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.expose_secret().clone(),
        })
    }
}

#[async_trait]
impl TokenBroker for HttpTokenBroker {
    async fn proxy_call(
        &self,
        service: ServiceKind,
        connection_id: &str,
        endpoint: &str,
        method: ProxyMethod,
        body: Option<Value>,
    ) -> Result<Value, BrokerError> {
        let url = format!("{}/proxy{}", self.base_url, endpoint);

        let mut request = match method {
            ProxyMethod::Get => self.client.get(&url),
            ProxyMethod::Post => self.client.post(&url),
            ProxyMethod::Put => self.client.put(&url),
            ProxyMethod::Delete => self.client.delete(&url),
        };

        request = request
            .bearer_auth(&self.secret_key)
            .header("provider-config-key", service.as_str())
            .header("connection-id", connection_id);

        if let Some(body) = body {
            request = request.json(&body);
        }

        tracing::debug!(
            service = %service,
            method = method.as_str(),
            endpoint = %endpoint,
            "Proxying upstream call"
        );

        let response = request.send().await.map_err(|e| BrokerError::Transport {
            service: service.as_str(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                service = %service,
                status = status.as_u16(),
                endpoint = %endpoint,
                "Upstream call failed"
            );
            return Err(BrokerError::Status {
                service: service.as_str(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|_| BrokerError::Decode {
                service: service.as_str(),
            })
    }
}
