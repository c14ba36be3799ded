use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::services::diff::{ConfigKey, content_md5};
use crate::services::failover::{FailoverStoreConfig, Snapshot};

pub const DEFAULT_CONFIG_TYPE: &str = "text";

/// 配置快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub key: ConfigKey,
    pub content: String,
    pub md5: String,
    pub config_type: String,
}

impl ConfigSnapshot {
    pub fn new(key: ConfigKey, content: impl Into<String>, config_type: Option<&str>) -> Self {
        let content = content.into();
        Self {
            md5: content_md5(&content),
            key,
            content,
            config_type: config_type.unwrap_or(DEFAULT_CONFIG_TYPE).to_string(),
        }
    }
}

impl Snapshot for ConfigSnapshot {
    fn key(&self) -> String {
        self.key.group_key()
    }

    fn name(&self) -> &str {
        &self.key.data_id
    }

    fn has_payload(&self) -> bool {
        !self.content.is_empty()
    }
}

/// 发布前经过过滤链的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRequest {
    pub key: ConfigKey,
    pub content: String,
    pub config_type: String,
}

/// 返回调用方前经过过滤链的响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigResponse {
    pub key: ConfigKey,
    pub content: Option<String>,
}

/// 发布请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub key: ConfigKey,
    pub content: String,
    pub config_type: String,
    /// 非空时服务端执行 CAS 更新
    pub cas_md5: Option<String>,
    pub tag: Option<String>,
}

/// 配置客户端配置
#[derive(Debug, Clone)]
pub struct ConfigClientConfig {
    /// 服务端地址，例如 http://127.0.0.1:8848
    pub server_addr: String,
    /// 配置接口的上下文路径
    pub context_path: String,
    /// 默认租户
    pub namespace: Option<String>,
    /// 本地快照与容灾目录的根目录
    pub cache_dir: PathBuf,
    pub long_poll_timeout: Duration,
    pub failover: FailoverStoreConfig,
}

impl ConfigClientConfig {
    /// 客户端标识，用于日志和本地目录名
    pub fn agent_name(&self) -> String {
        let addr = self
            .server_addr
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .replace([':', '/'], "_");
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("config-{addr}-{ns}"),
            _ => format!("config-{addr}"),
        }
    }
}

impl Default for ConfigClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "http://127.0.0.1:8848".to_string(),
            context_path: "/nacos/v1/cs".to_string(),
            namespace: None,
            cache_dir: PathBuf::from("data/config"),
            long_poll_timeout: Duration::from_secs(30),
            failover: FailoverStoreConfig::default(),
        }
    }
}
