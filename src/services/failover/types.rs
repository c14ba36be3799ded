use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::services::scheduler::SchedulerError;

/// 容灾开关文件名
pub const FAILOVER_SWITCH: &str = "00-00---000-VIPSRV_FAILOVER_SWITCH-000---00-00";
pub const ALL_IPS: &str = "000--00-ALL_IPS--00--000";
pub const ENV_LIST_KEY: &str = "envList";
pub const ENV_CONFIGS: &str = "00-00---000-ENV_CONFIGS-000---00-00";
pub const VIPCLIENT_CONFIG: &str = "vipclient.properties";
pub const ALL_HOSTS: &str = "00-00---000-ALL_HOSTS-000---00-00";

/// 内部簿记用的保留名称，不能当作真实数据落盘
pub const RESERVED_NAMES: [&str; 5] = [ALL_IPS, ENV_LIST_KEY, ENV_CONFIGS, VIPCLIENT_CONFIG, ALL_HOSTS];

/// 可落盘的快照数据
pub trait Snapshot: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 内存表中的键
    fn key(&self) -> String;
    /// 数据名称，用于识别保留条目
    fn name(&self) -> &str;
    /// 地址列表或内容是否非空
    fn has_payload(&self) -> bool;

    fn is_reserved(&self) -> bool {
        let key = self.key();
        RESERVED_NAMES
            .iter()
            .any(|reserved| key == *reserved || self.name() == *reserved)
    }
}

/// 快照数据来源（服务注册表或配置缓存）
pub trait SnapshotSource<T>: Send + Sync {
    fn snapshot_view(&self) -> HashMap<String, T>;
}

impl<T: Snapshot> SnapshotSource<T> for DashMap<String, T> {
    fn snapshot_view(&self) -> HashMap<String, T> {
        self.iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// 容灾存储错误类型
#[derive(Error, Debug)]
pub enum FailoverError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl FailoverError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// 容灾存储配置
#[derive(Debug, Clone)]
pub struct FailoverStoreConfig {
    pub switch_refresh_interval: Duration,
    pub dump_initial_delay: Duration,
    pub dump_interval: Duration,
    pub bootstrap_delay: Duration,
}

impl Default for FailoverStoreConfig {
    fn default() -> Self {
        Self {
            switch_refresh_interval: Duration::from_millis(5000),
            dump_initial_delay: Duration::from_secs(30 * 60),
            dump_interval: Duration::from_secs(24 * 60 * 60),
            bootstrap_delay: Duration::from_millis(10_000),
        }
    }
}
