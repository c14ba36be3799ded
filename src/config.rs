use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::config_client::ConfigClientConfig;
use crate::services::failover::FailoverStoreConfig;
use crate::services::naming::{DeleterKind, NamingConfig};

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "OPIZONTAS_";

/// 配置加载错误类型
#[derive(Error, Debug)]
pub enum AppConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub naming: NamingSection,
    pub failover: FailoverSection,
    pub client: ClientSection,
    pub scheduler: SchedulerSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingSection {
    pub namespace_id: String,
    pub local_ip: String,
    pub http_port: u16,
    pub context_path: String,
    /// 集群成员 ip:port
    pub members: Vec<String>,
    pub check_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub ip_delete_timeout_ms: u64,
    pub use_new_protocol: bool,
    pub health_check_enabled: bool,
    pub expire_instance: bool,
    pub deleter: DeleterKind,
    pub push_channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverSection {
    /// 命名服务容灾目录
    pub dir: PathBuf,
    pub switch_refresh_interval_ms: u64,
    pub dump_initial_delay_secs: u64,
    pub dump_interval_secs: u64,
    pub bootstrap_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// 是否在本节点内启动配置客户端
    pub enabled: bool,
    pub server_addr: String,
    pub context_path: String,
    pub namespace: Option<String>,
    pub cache_dir: PathBuf,
    pub long_poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// EnvFilter 语法，RUST_LOG 优先
    pub level: String,
}

/// 环境变量覆盖项，例如 OPIZONTAS_NAMING_HTTP_PORT=8849
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    naming_namespace_id: Option<String>,
    naming_local_ip: Option<String>,
    naming_http_port: Option<u16>,
    naming_members: Option<String>,
    naming_health_check_enabled: Option<bool>,
    naming_expire_instance: Option<bool>,
    naming_use_new_protocol: Option<bool>,
    naming_deleter: Option<DeleterKind>,
    failover_dir: Option<PathBuf>,
    client_enabled: Option<bool>,
    client_server_addr: Option<String>,
    client_namespace: Option<String>,
    client_cache_dir: Option<PathBuf>,
    scheduler_shutdown_timeout_ms: Option<u64>,
    logging_level: Option<String>,
}

impl Config {
    /// 读取 config.toml（不存在时使用默认值），再应用 .env 与环境变量覆盖
    pub fn load() -> Result<Self, AppConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(CONFIG_FILE)?;
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(config_str) => Ok(toml::from_str(&config_str)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(AppConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// 只读取带 OPIZONTAS_ 前缀的变量
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), AppConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: EnvOverrides = envy::prefixed(ENV_PREFIX).from_iter(vars)?;

        if let Some(v) = env.naming_namespace_id {
            self.naming.namespace_id = v;
        }
        if let Some(v) = env.naming_local_ip {
            self.naming.local_ip = v;
        }
        if let Some(v) = env.naming_http_port {
            self.naming.http_port = v;
        }
        if let Some(v) = env.naming_members {
            self.naming.members = v
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env.naming_health_check_enabled {
            self.naming.health_check_enabled = v;
        }
        if let Some(v) = env.naming_expire_instance {
            self.naming.expire_instance = v;
        }
        if let Some(v) = env.naming_use_new_protocol {
            self.naming.use_new_protocol = v;
        }
        if let Some(v) = env.naming_deleter {
            self.naming.deleter = v;
        }
        if let Some(v) = env.failover_dir {
            self.failover.dir = v;
        }
        if let Some(v) = env.client_enabled {
            self.client.enabled = v;
        }
        if let Some(v) = env.client_server_addr {
            self.client.server_addr = v;
        }
        if let Some(v) = env.client_namespace {
            self.client.namespace = Some(v);
        }
        if let Some(v) = env.client_cache_dir {
            self.client.cache_dir = v;
        }
        if let Some(v) = env.scheduler_shutdown_timeout_ms {
            self.scheduler.shutdown_timeout_ms = v;
        }
        if let Some(v) = env.logging_level {
            self.logging.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppConfigError> {
        if self.naming.heartbeat_timeout_ms > self.naming.ip_delete_timeout_ms {
            return Err(AppConfigError::Invalid(
                "naming.heartbeat_timeout_ms must not exceed naming.ip_delete_timeout_ms".to_string(),
            ));
        }
        if self.naming.check_interval_ms == 0 || self.failover.switch_refresh_interval_ms == 0 {
            return Err(AppConfigError::Invalid("intervals must be positive".to_string()));
        }
        if self.naming.push_channel_capacity == 0 {
            return Err(AppConfigError::Invalid("naming.push_channel_capacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn naming_config(&self) -> NamingConfig {
        let n = &self.naming;
        NamingConfig {
            namespace_id: n.namespace_id.clone(),
            local_ip: n.local_ip.clone(),
            http_port: n.http_port,
            context_path: n.context_path.clone(),
            members: n.members.clone(),
            check_interval: Duration::from_millis(n.check_interval_ms),
            heartbeat_timeout: Duration::from_millis(n.heartbeat_timeout_ms),
            ip_delete_timeout: Duration::from_millis(n.ip_delete_timeout_ms),
            use_new_protocol: n.use_new_protocol,
            health_check_enabled: n.health_check_enabled,
            expire_instance: n.expire_instance,
            deleter: n.deleter,
            push_channel_capacity: n.push_channel_capacity,
        }
    }

    pub fn failover_config(&self) -> FailoverStoreConfig {
        let f = &self.failover;
        FailoverStoreConfig {
            switch_refresh_interval: Duration::from_millis(f.switch_refresh_interval_ms),
            dump_initial_delay: Duration::from_secs(f.dump_initial_delay_secs),
            dump_interval: Duration::from_secs(f.dump_interval_secs),
            bootstrap_delay: Duration::from_millis(f.bootstrap_delay_ms),
        }
    }

    pub fn client_config(&self) -> ConfigClientConfig {
        let c = &self.client;
        ConfigClientConfig {
            server_addr: c.server_addr.clone(),
            context_path: c.context_path.clone(),
            namespace: c.namespace.clone().filter(|ns| !ns.trim().is_empty()),
            cache_dir: c.cache_dir.clone(),
            long_poll_timeout: Duration::from_millis(c.long_poll_timeout_ms),
            failover: self.failover_config(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduler.shutdown_timeout_ms)
    }
}

impl Default for NamingSection {
    fn default() -> Self {
        let defaults = NamingConfig::default();
        Self {
            namespace_id: defaults.namespace_id,
            local_ip: defaults.local_ip,
            http_port: defaults.http_port,
            context_path: defaults.context_path,
            members: defaults.members,
            check_interval_ms: defaults.check_interval.as_millis() as u64,
            heartbeat_timeout_ms: defaults.heartbeat_timeout.as_millis() as u64,
            ip_delete_timeout_ms: defaults.ip_delete_timeout.as_millis() as u64,
            use_new_protocol: defaults.use_new_protocol,
            health_check_enabled: defaults.health_check_enabled,
            expire_instance: defaults.expire_instance,
            deleter: defaults.deleter,
            push_channel_capacity: defaults.push_channel_capacity,
        }
    }
}

impl Default for FailoverSection {
    fn default() -> Self {
        let defaults = FailoverStoreConfig::default();
        Self {
            dir: PathBuf::from("data/naming/failover"),
            switch_refresh_interval_ms: defaults.switch_refresh_interval.as_millis() as u64,
            dump_initial_delay_secs: defaults.dump_initial_delay.as_secs(),
            dump_interval_secs: defaults.dump_interval.as_secs(),
            bootstrap_delay_ms: defaults.bootstrap_delay.as_millis() as u64,
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        let defaults = ConfigClientConfig::default();
        Self {
            enabled: false,
            server_addr: defaults.server_addr,
            context_path: defaults.context_path,
            namespace: defaults.namespace,
            cache_dir: defaults.cache_dir,
            long_poll_timeout_ms: defaults.long_poll_timeout.as_millis() as u64,
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 5000,
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [naming]
            http_port = 9000
            members = ["10.0.0.1:9000", "10.0.0.2:9000"]
            deleter = "local"

            [failover]
            dir = "/var/lib/hub/failover"
            "#,
        )
        .unwrap();

        assert_eq!(config.naming.http_port, 9000);
        assert_eq!(config.naming.deleter, DeleterKind::Local);
        assert_eq!(config.naming.heartbeat_timeout_ms, 15_000);
        assert_eq!(config.failover.dir, PathBuf::from("/var/lib/hub/failover"));
        assert_eq!(config.failover_config().dump_interval, Duration::from_secs(86_400));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_apply_only_with_prefix() {
        let mut config = Config::default();
        config
            .apply_env(vars(&[
                ("OPIZONTAS_NAMING_HTTP_PORT", "8849"),
                ("OPIZONTAS_NAMING_MEMBERS", "10.0.0.1:8849, 10.0.0.2:8849"),
                ("OPIZONTAS_NAMING_EXPIRE_INSTANCE", "false"),
                ("OPIZONTAS_CLIENT_NAMESPACE", "dev"),
                ("NAMING_LOCAL_IP", "10.9.9.9"),
            ]))
            .unwrap();

        assert_eq!(config.naming.http_port, 8849);
        assert_eq!(config.naming.members.len(), 2);
        assert!(!config.naming.expire_instance);
        assert_eq!(config.naming.local_ip, "127.0.0.1");
        assert_eq!(config.client_config().namespace.as_deref(), Some("dev"));
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_env(vars(&[("OPIZONTAS_NAMING_HTTP_PORT", "not-a-port")]));
        assert!(matches!(result, Err(AppConfigError::Env(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_timeouts() {
        let mut config = Config::default();
        config.naming.heartbeat_timeout_ms = 60_000;
        assert!(matches!(config.validate(), Err(AppConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.naming.http_port, 8848);
    }
}
