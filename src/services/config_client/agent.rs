use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use http::StatusCode;

use super::error::ConfigError;
use super::types::{ConfigClientConfig, ConfigSnapshot, DEFAULT_CONFIG_TYPE, PublishRequest};
use crate::services::diff::ConfigKey;

/// 与配置服务端交互的传输层接口
pub trait ConfigServerAgent: Send + Sync {
    fn name(&self) -> &str;

    /// 查询配置，服务端不存在时返回 None
    fn query_config<'a>(
        &'a self,
        key: &'a ConfigKey,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<ConfigSnapshot>, ConfigError>>;

    fn publish_config<'a>(&'a self, request: &'a PublishRequest) -> BoxFuture<'a, Result<bool, ConfigError>>;

    fn remove_config<'a>(
        &'a self,
        key: &'a ConfigKey,
        tag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool, ConfigError>>;

    /// 长轮询，返回服务端编码后的变更列表
    fn listen(&self, listening_configs: String, timeout: Duration) -> BoxFuture<'_, Result<String, ConfigError>>;

    fn is_healthy(&self) -> bool;
}

/// 基于 HTTP 的配置服务端代理
#[derive(Debug)]
pub struct HttpConfigAgent {
    name: String,
    base_url: String,
    client: reqwest::Client,
    healthy: AtomicBool,
}

impl HttpConfigAgent {
    pub fn new(config: &ConfigClientConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()?;

        Ok(Self {
            name: config.agent_name(),
            base_url: format!(
                "{}{}",
                config.server_addr.trim_end_matches('/'),
                config.context_path
            ),
            client,
            healthy: AtomicBool::new(true),
        })
    }

    fn configs_url(&self) -> String {
        format!("{}/configs", self.base_url)
    }

    fn key_params(key: &ConfigKey) -> Vec<(&'static str, String)> {
        let mut params = vec![("dataId", key.data_id.clone()), ("group", key.group.clone())];
        if let Some(tenant) = &key.tenant {
            params.push(("tenant", tenant.clone()));
        }
        params
    }

    // 收到任何 HTTP 响应都说明服务端可达
    fn track<T>(&self, result: Result<T, reqwest::Error>) -> Result<T, ConfigError> {
        match result {
            Ok(value) => {
                self.healthy.store(true, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    self.healthy.store(false, Ordering::Relaxed);
                }
                if e.is_timeout() {
                    Err(ConfigError::Timeout)
                } else {
                    Err(ConfigError::Transport(e))
                }
            }
        }
    }

    async fn do_query(&self, key: &ConfigKey, timeout: Duration) -> Result<Option<ConfigSnapshot>, ConfigError> {
        let response = self.track(
            self.client
                .get(self.configs_url())
                .query(&Self::key_params(key))
                .timeout(timeout)
                .send()
                .await,
        )?;

        match response.status() {
            StatusCode::OK => {
                let config_type = response
                    .headers()
                    .get("Config-Type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(DEFAULT_CONFIG_TYPE)
                    .to_string();
                let content = self.track(response.text().await)?;
                Ok(Some(ConfigSnapshot::new(key.clone(), content, Some(&config_type))))
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::FORBIDDEN => Err(ConfigError::Forbidden(key.to_string())),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(ConfigError::Server {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn do_publish(&self, request: &PublishRequest) -> Result<bool, ConfigError> {
        let mut params = Self::key_params(&request.key);
        params.push(("content", request.content.clone()));
        params.push(("type", request.config_type.clone()));
        if let Some(cas_md5) = &request.cas_md5 {
            params.push(("casMd5", cas_md5.clone()));
        }
        if let Some(tag) = &request.tag {
            params.push(("tag", tag.clone()));
        }

        let response = self.track(self.client.post(self.configs_url()).form(&params).send().await)?;
        match response.status() {
            StatusCode::OK => {
                tracing::info!(agent = %self.name, key = %request.key, "Published config");
                Ok(true)
            }
            StatusCode::FORBIDDEN => Err(ConfigError::Forbidden(request.key.to_string())),
            status => {
                tracing::warn!(
                    agent = %self.name,
                    key = %request.key,
                    status = status.as_u16(),
                    cas = request.cas_md5.is_some(),
                    "Publish config rejected by server"
                );
                Ok(false)
            }
        }
    }

    async fn do_remove(&self, key: &ConfigKey, tag: Option<&str>) -> Result<bool, ConfigError> {
        let mut params = Self::key_params(key);
        if let Some(tag) = tag {
            params.push(("tag", tag.to_string()));
        }

        let response = self.track(self.client.delete(self.configs_url()).query(&params).send().await)?;
        match response.status() {
            StatusCode::OK => {
                tracing::info!(agent = %self.name, key = %key, "Removed config");
                Ok(true)
            }
            StatusCode::FORBIDDEN => Err(ConfigError::Forbidden(key.to_string())),
            status => {
                tracing::warn!(agent = %self.name, key = %key, status = status.as_u16(), "Remove config failed");
                Ok(false)
            }
        }
    }

    async fn do_listen(&self, listening_configs: String, timeout: Duration) -> Result<String, ConfigError> {
        // 留出余量，避免服务端挂起时间与请求超时同时到达
        let request_timeout = timeout + timeout / 2;
        let response = self.track(
            self.client
                .post(format!("{}/listener", self.configs_url()))
                .header("Long-Pulling-Timeout", timeout.as_millis().to_string())
                .form(&[("Listening-Configs", listening_configs)])
                .timeout(request_timeout)
                .send()
                .await,
        )?;

        match response.status() {
            StatusCode::OK => self.track(response.text().await),
            StatusCode::FORBIDDEN => Err(ConfigError::Forbidden("listener".to_string())),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(ConfigError::Server {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

impl ConfigServerAgent for HttpConfigAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_config<'a>(
        &'a self,
        key: &'a ConfigKey,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<ConfigSnapshot>, ConfigError>> {
        Box::pin(self.do_query(key, timeout))
    }

    fn publish_config<'a>(&'a self, request: &'a PublishRequest) -> BoxFuture<'a, Result<bool, ConfigError>> {
        Box::pin(self.do_publish(request))
    }

    fn remove_config<'a>(
        &'a self,
        key: &'a ConfigKey,
        tag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool, ConfigError>> {
        Box::pin(self.do_remove(key, tag))
    }

    fn listen(&self, listening_configs: String, timeout: Duration) -> BoxFuture<'_, Result<String, ConfigError>> {
        Box::pin(self.do_listen(listening_configs, timeout))
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
