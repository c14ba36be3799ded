use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::agent::ConfigServerAgent;
use super::error::ConfigError;
use super::filter::ConfigFilterChain;
use super::snapshot::LocalSnapshotStore;
use super::types::{ConfigClientConfig, ConfigRequest, ConfigResponse, ConfigSnapshot, DEFAULT_CONFIG_TYPE, PublishRequest};
use crate::services::diff::{ClientWatchSet, ConfigKey, decode_changed_keys, encode_watch_set};
use crate::services::failover::{FailoverStore, SnapshotSource};
use crate::services::scheduler::Scheduler;

const MAX_LOG_CONTENT: usize = 100;

/// 配置客户端
///
/// 读取顺序：容灾缓存 -> 服务端 -> 本地快照，结果都经过过滤链。
pub struct ConfigClient {
    config: ConfigClientConfig,
    agent: Arc<dyn ConfigServerAgent>,
    filters: ConfigFilterChain,
    failover: Arc<FailoverStore<ConfigSnapshot>>,
    snapshots: LocalSnapshotStore,
    // 最近一次从服务端拉取成功的配置，供容灾落盘使用
    cache: Arc<DashMap<String, ConfigSnapshot>>,
}

impl ConfigClient {
    pub fn new(config: ConfigClientConfig, agent: Arc<dyn ConfigServerAgent>, filters: ConfigFilterChain) -> Self {
        let root = config.cache_dir.join(agent.name());
        let cache: Arc<DashMap<String, ConfigSnapshot>> = Arc::new(DashMap::new());
        let source: Arc<dyn SnapshotSource<ConfigSnapshot>> = cache.clone();

        let failover = Arc::new(FailoverStore::new(
            agent.name(),
            root.join("failover"),
            config.failover.clone(),
            source,
        ));

        Self {
            snapshots: LocalSnapshotStore::new(root),
            config,
            agent,
            filters,
            failover,
            cache,
        }
    }

    /// 启动容灾缓存的后台任务
    pub fn start(&self, scheduler: &Scheduler) -> Result<(), ConfigError> {
        self.failover.start(scheduler)?;
        Ok(())
    }

    pub fn failover_store(&self) -> &Arc<FailoverStore<ConfigSnapshot>> {
        &self.failover
    }

    pub fn local_snapshots(&self) -> &LocalSnapshotStore {
        &self.snapshots
    }

    pub fn cached(&self, key: &ConfigKey) -> Option<ConfigSnapshot> {
        self.cache.get(&key.group_key()).map(|entry| entry.value().clone())
    }

    /// 获取配置内容
    pub async fn get_config(
        &self,
        data_id: &str,
        group: Option<&str>,
        tenant: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<String>, ConfigError> {
        let key = self.build_key(data_id, group, tenant)?;
        let agent = self.agent.name();

        // 优先使用容灾缓存
        if let Some(snapshot) = self.failover.read(&key.group_key()) {
            tracing::warn!(
                agent = %agent,
                key = %key,
                config = %truncate_content(&snapshot.content),
                "[get-config] get failover ok"
            );
            return self.filter_response(key, Some(snapshot.content));
        }

        match tokio::time::timeout(timeout, self.agent.query_config(&key, timeout)).await {
            Ok(Ok(Some(snapshot))) => {
                self.remember(&snapshot).await;
                return self.filter_response(key, Some(snapshot.content));
            }
            Ok(Ok(None)) => {
                tracing::warn!(agent = %agent, key = %key, "[get-config] config not found on server");
                self.forget(&key).await;
                return self.filter_response(key, None);
            }
            Ok(Err(e)) if e.is_forbidden() => return Err(e),
            Ok(Err(e)) => {
                tracing::warn!(agent = %agent, key = %key, error = %e, "[get-config] get from server error");
            }
            Err(_) => {
                tracing::warn!(
                    agent = %agent,
                    key = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "[get-config] get from server timed out"
                );
            }
        }

        // 服务端不可用时读取本地快照
        let content = match self.snapshots.get(&key).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(agent = %agent, key = %key, error = %e, "[get-config] failed to read snapshot");
                None
            }
        };
        match &content {
            Some(content) => tracing::warn!(
                agent = %agent,
                key = %key,
                config = %truncate_content(content),
                "[get-config] get snapshot ok"
            ),
            None => tracing::warn!(agent = %agent, key = %key, "[get-config] no snapshot available"),
        }
        self.filter_response(key, content)
    }

    /// 发布配置，`cas_md5` 非空时由服务端执行 CAS
    pub async fn publish_config(
        &self,
        data_id: &str,
        group: Option<&str>,
        tenant: Option<&str>,
        content: &str,
        config_type: Option<&str>,
        cas_md5: Option<&str>,
    ) -> Result<bool, ConfigError> {
        let key = self.build_key(data_id, group, tenant)?;
        if content.trim().is_empty() {
            return Err(ConfigError::InvalidParam("content must not be blank".to_string()));
        }

        let mut request = ConfigRequest {
            key,
            content: content.to_string(),
            config_type: config_type.unwrap_or(DEFAULT_CONFIG_TYPE).to_string(),
        };
        self.filters.do_request_filter(&mut request)?;

        let publish = PublishRequest {
            key: request.key,
            content: request.content,
            config_type: request.config_type,
            cas_md5: cas_md5.map(str::to_string),
            tag: None,
        };
        self.agent.publish_config(&publish).await
    }

    pub async fn remove_config(
        &self,
        data_id: &str,
        group: Option<&str>,
        tenant: Option<&str>,
        tag: Option<&str>,
    ) -> Result<bool, ConfigError> {
        let key = self.build_key(data_id, group, tenant)?;
        self.agent.remove_config(&key, tag).await
    }

    /// 长轮询一次，返回服务端报告有变化的配置
    ///
    /// `timeout` 为空时使用配置中的长轮询超时。
    pub async fn poll_changes(
        &self,
        watch_set: &ClientWatchSet,
        timeout: Option<Duration>,
    ) -> Result<Vec<ConfigKey>, ConfigError> {
        if watch_set.is_empty() {
            return Ok(Vec::new());
        }

        let listening_configs = encode_watch_set(watch_set)?;
        let timeout = timeout.unwrap_or(self.config.long_poll_timeout);
        let response = self.agent.listen(listening_configs, timeout).await?;
        let changed = decode_changed_keys(&response)?;

        if !changed.is_empty() {
            tracing::info!(agent = %self.agent.name(), changed = changed.len(), "[polling-resp] config changed");
        }
        Ok(changed)
    }

    pub fn server_status(&self) -> &'static str {
        if self.agent.is_healthy() { "UP" } else { "DOWN" }
    }

    /// 关闭前把内存中的配置全部落盘，后台任务随调度器一起停止
    pub async fn shutdown(&self) -> Result<(), ConfigError> {
        let written = self.failover.dump().await?;
        tracing::info!(agent = %self.agent.name(), written, "Config client shutdown");
        Ok(())
    }

    fn build_key(&self, data_id: &str, group: Option<&str>, tenant: Option<&str>) -> Result<ConfigKey, ConfigError> {
        let tenant = tenant.or(self.config.namespace.as_deref());
        let key = ConfigKey::new(data_id, group, tenant).map_err(|e| ConfigError::InvalidParam(e.to_string()))?;

        if !is_valid(&key.data_id) {
            return Err(ConfigError::InvalidParam(format!("dataId invalid: {}", key.data_id)));
        }
        if !is_valid(&key.group) {
            return Err(ConfigError::InvalidParam(format!("group invalid: {}", key.group)));
        }
        Ok(key)
    }

    fn filter_response(&self, key: ConfigKey, content: Option<String>) -> Result<Option<String>, ConfigError> {
        let mut response = ConfigResponse { key, content };
        self.filters.do_response_filter(&mut response)?;
        Ok(response.content)
    }

    async fn remember(&self, snapshot: &ConfigSnapshot) {
        if let Err(e) = self.snapshots.save(&snapshot.key, Some(&snapshot.content)).await {
            tracing::error!(key = %snapshot.key, error = %e, "Failed to save config snapshot");
        }
        self.cache.insert(snapshot.key.group_key(), snapshot.clone());
    }

    async fn forget(&self, key: &ConfigKey) {
        if let Err(e) = self.snapshots.save(key, None).await {
            tracing::error!(key = %key, error = %e, "Failed to clear config snapshot");
        }
        self.cache.remove(&key.group_key());
    }
}

// dataId / group 只允许字母数字以及 _-.:
fn is_valid(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_LOG_CONTENT {
        content.to_string()
    } else {
        let head: String = content.chars().take(MAX_LOG_CONTENT).collect();
        format!("{head}...")
    }
}
