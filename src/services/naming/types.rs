use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::failover::Snapshot;
use crate::services::scheduler::SchedulerError;

pub const DEFAULT_CLUSTER: &str = "DEFAULT";
pub const DEFAULT_NAMESPACE: &str = "public";
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_IP_DELETE_TIMEOUT_MS: u64 = 30_000;
/// ServiceInfo 键中服务名与集群的分隔符
pub const CLUSTER_SPLITTER: &str = "@@";
/// ServiceInfo 键中命名空间与服务名的分隔符
pub const NAMESPACE_SPLITTER: &str = "##";
/// 实例元数据中单独指定超时（毫秒）的保留键
pub const PRESERVED_HEART_BEAT_TIMEOUT: &str = "preserved.heart.beat.timeout";
pub const PRESERVED_IP_DELETE_TIMEOUT: &str = "preserved.ip.delete.timeout";

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// 服务实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub ip: String,
    pub port: u16,
    pub cluster_name: String,
    pub healthy: bool,
    /// 人工标记的实例不参与自动的健康/过期状态转换
    pub marked: bool,
    /// 最近一次心跳（毫秒时间戳）
    pub last_beat: u64,
    #[serde(rename = "instanceHeartBeatTimeOut")]
    pub heartbeat_timeout_ms: u64,
    #[serde(rename = "ipDeleteTimeout")]
    pub ip_delete_timeout_ms: u64,
    pub ephemeral: bool,
    pub weight: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Instance {
    pub fn new(ip: impl Into<String>, port: u16, cluster_name: Option<&str>) -> Self {
        Self {
            ip: ip.into(),
            port,
            cluster_name: cluster_name
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(DEFAULT_CLUSTER)
                .to_string(),
            healthy: true,
            marked: false,
            last_beat: now_millis(),
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            ip_delete_timeout_ms: DEFAULT_IP_DELETE_TIMEOUT_MS,
            ephemeral: true,
            weight: 1.0,
            metadata: HashMap::new(),
        }
    }

    /// 使用配置中的超时时间，元数据里的保留键优先
    pub fn with_timeouts(mut self, heartbeat_timeout: Duration, ip_delete_timeout: Duration) -> Self {
        self.heartbeat_timeout_ms = self
            .preserved_millis(PRESERVED_HEART_BEAT_TIMEOUT)
            .unwrap_or(heartbeat_timeout.as_millis() as u64);
        self.ip_delete_timeout_ms = self
            .preserved_millis(PRESERVED_IP_DELETE_TIMEOUT)
            .unwrap_or(ip_delete_timeout.as_millis() as u64);
        self
    }

    fn preserved_millis(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(|value| value.trim().parse().ok())
    }

    /// 实例在服务内的唯一键 ip:port:cluster
    pub fn instance_key(&self) -> String {
        instance_key(&self.ip, self.port, &self.cluster_name)
    }

    pub fn beat_elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_beat)
    }

    pub fn is_beat_timed_out(&self, now_ms: u64) -> bool {
        self.beat_elapsed(now_ms) > self.heartbeat_timeout_ms
    }

    pub fn is_delete_timed_out(&self, now_ms: u64) -> bool {
        self.beat_elapsed(now_ms) > self.ip_delete_timeout_ms
    }
}

pub fn instance_key(ip: &str, port: u16, cluster_name: &str) -> String {
    format!("{ip}:{port}:{cluster_name}")
}

/// 服务端维护的服务及其实例
#[derive(Debug)]
pub struct Service {
    pub namespace_id: String,
    pub name: String,
    /// ip:port:cluster -> 实例
    pub instances: DashMap<String, Instance>,
}

impl Service {
    pub fn new(namespace_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            name: name.into(),
            instances: DashMap::new(),
        }
    }

    /// namespace##serviceName
    pub fn service_key(&self) -> String {
        service_key(&self.namespace_id, &self.name)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn all_instances(&self) -> Vec<Instance> {
        let mut hosts: Vec<Instance> = self.instances.iter().map(|entry| entry.value().clone()).collect();
        hosts.sort_by(|a, b| a.instance_key().cmp(&b.instance_key()));
        hosts
    }

    /// 生成客户端视图，`clusters` 为空时返回全部集群
    pub fn to_service_info(&self, clusters: &[&str]) -> ServiceInfo {
        let hosts = self
            .all_instances()
            .into_iter()
            .filter(|i| clusters.is_empty() || clusters.contains(&i.cluster_name.as_str()))
            .collect();

        ServiceInfo {
            namespace_id: self.namespace_id.clone(),
            name: self.name.clone(),
            clusters: clusters.join(","),
            hosts,
            last_ref_time: now_millis(),
        }
    }
}

pub fn service_key(namespace_id: &str, service_name: &str) -> String {
    format!("{namespace_id}##{service_name}")
}

/// 客户端视角的服务信息，同时也是容灾快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    /// 为空时键中不带命名空间
    #[serde(default)]
    pub namespace_id: String,
    pub name: String,
    #[serde(default)]
    pub clusters: String,
    #[serde(default)]
    pub hosts: Vec<Instance>,
    #[serde(default)]
    pub last_ref_time: u64,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, clusters: impl Into<String>) -> Self {
        Self {
            namespace_id: String::new(),
            name: name.into(),
            clusters: clusters.into(),
            hosts: Vec::new(),
            last_ref_time: 0,
        }
    }
}

impl Snapshot for ServiceInfo {
    /// `[namespace##]name[@@clusters]`
    fn key(&self) -> String {
        let mut key = String::new();
        if !self.namespace_id.is_empty() {
            key.push_str(&self.namespace_id);
            key.push_str(NAMESPACE_SPLITTER);
        }
        key.push_str(&self.name);
        if !self.clusters.is_empty() {
            key.push_str(CLUSTER_SPLITTER);
            key.push_str(&self.clusters);
        }
        key
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_payload(&self) -> bool {
        !self.hosts.is_empty()
    }
}

/// 注册表错误类型
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid instance: {0}")]
    InvalidInstance(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Instance not found: {instance} in service {service}")]
    InstanceNotFound { service: String, instance: String },

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// 删除实例的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleterKind {
    /// 调用本节点自身的 HTTP 接口
    Http,
    /// 进程内队列直接交给注册表
    Local,
}

/// 命名服务配置
#[derive(Debug, Clone)]
pub struct NamingConfig {
    pub namespace_id: String,
    /// 本节点地址，同时用于分片判断和自调用删除
    pub local_ip: String,
    pub http_port: u16,
    pub context_path: String,
    /// 集群成员 ip:port，为空时按单机处理
    pub members: Vec<String>,
    pub check_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub ip_delete_timeout: Duration,
    pub use_new_protocol: bool,
    pub health_check_enabled: bool,
    pub expire_instance: bool,
    pub deleter: DeleterKind,
    pub push_channel_capacity: usize,
}

impl NamingConfig {
    pub fn local_address(&self) -> String {
        format!("{}:{}", self.local_ip, self.http_port)
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            namespace_id: DEFAULT_NAMESPACE.to_string(),
            local_ip: "127.0.0.1".to_string(),
            http_port: 8848,
            context_path: "/nacos/v1/ns".to_string(),
            members: Vec::new(),
            check_interval: Duration::from_millis(5000),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            ip_delete_timeout: Duration::from_millis(DEFAULT_IP_DELETE_TIMEOUT_MS),
            use_new_protocol: false,
            health_check_enabled: true,
            expire_instance: true,
            deleter: DeleterKind::Http,
            push_channel_capacity: 1024,
        }
    }
}
