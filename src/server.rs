use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::Config;
use crate::services::config_client::{ConfigClient, ConfigError, ConfigFilterChain, HttpConfigAgent};
use crate::services::failover::{FailoverError, FailoverStore, SnapshotSource};
use crate::services::naming::{
    BroadcastPushService, DeleteError, DeleterKind, HashDistroMapper, HealthCheckContext, HealthCheckReactor,
    HealthSwitches, HttpInstanceDeleter, InstanceDeleter, PushConfig, QueuedInstanceDeleter, ServiceInfo,
    ServiceRegistry,
};
use crate::services::scheduler::{Scheduler, SchedulerError};

const PUSH_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const LOCAL_DELETE_QUEUE_CAPACITY: usize = 1024;

/// 节点启动错误类型
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Failed to build instance deleter: {0}")]
    Deleter(#[from] DeleteError),

    #[error("Config client error: {0}")]
    ConfigClient(#[from] ConfigError),

    #[error("Failover error: {0}")]
    Failover(#[from] FailoverError),

    #[error("Signal error: {0}")]
    Signal(#[from] std::io::Error),
}

/// 一个命名节点上运行的全部组件
pub struct Node {
    pub scheduler: Scheduler,
    pub registry: Arc<ServiceRegistry>,
    pub push: Arc<BroadcastPushService>,
    pub switches: Arc<HealthSwitches>,
    pub distro: Arc<HashDistroMapper>,
    pub naming_failover: Arc<FailoverStore<ServiceInfo>>,
    pub config_client: Option<ConfigClient>,
    shutdown_timeout: Duration,
}

impl Node {
    /// 组装并启动所有后台任务
    pub fn build(config: &Config) -> Result<Self, ServerError> {
        let naming = config.naming_config();
        let scheduler = Scheduler::new("naming");

        let push = Arc::new(BroadcastPushService::new(PushConfig {
            channel_capacity: naming.push_channel_capacity,
            ..Default::default()
        }));
        let switches = Arc::new(HealthSwitches::new(
            naming.use_new_protocol,
            naming.health_check_enabled,
            naming.expire_instance,
        ));
        let distro = Arc::new(if naming.members.is_empty() {
            HashDistroMapper::standalone(naming.local_address())
        } else {
            HashDistroMapper::new(naming.local_address(), naming.members.clone())
        });

        let (deleter, delete_queue) = match naming.deleter {
            DeleterKind::Http => (Arc::new(HttpInstanceDeleter::new(&naming)?) as Arc<dyn InstanceDeleter>, None),
            DeleterKind::Local => {
                let (deleter, rx) = QueuedInstanceDeleter::channel(LOCAL_DELETE_QUEUE_CAPACITY);
                (Arc::new(deleter) as Arc<dyn InstanceDeleter>, Some(rx))
            }
        };

        let ctx = Arc::new(HealthCheckContext {
            distro: distro.clone(),
            switches: switches.clone(),
            push: push.clone(),
            deleter,
            scheduler: scheduler.clone(),
        });
        let reactor = HealthCheckReactor::new(ctx, naming.check_interval);
        let registry = Arc::new(ServiceRegistry::new(reactor, push.clone()).with_naming_config(&naming));

        if let Some(rx) = delete_queue {
            scheduler.spawn(registry.clone().serve_deletions(rx));
        }

        let source: Arc<dyn SnapshotSource<ServiceInfo>> = registry.clone();
        let naming_failover = Arc::new(FailoverStore::new(
            "naming",
            config.failover.dir.clone(),
            config.failover_config(),
            source,
        ));
        naming_failover.start(&scheduler)?;

        let cleanup_push = push.clone();
        scheduler.schedule_with_fixed_delay(
            "push-channel-cleanup",
            PUSH_CLEANUP_INTERVAL,
            PUSH_CLEANUP_INTERVAL,
            move || {
                let push = cleanup_push.clone();
                async move {
                    push.cleanup_inactive_channels();
                }
            },
        )?;

        let config_client = if config.client.enabled {
            let client_config = config.client_config();
            let agent = HttpConfigAgent::new(&client_config)?;
            let client = ConfigClient::new(client_config, Arc::new(agent), ConfigFilterChain::new());
            client.start(&scheduler)?;
            Some(client)
        } else {
            None
        };

        tracing::info!(
            local_address = %naming.local_address(),
            members = distro.members().len(),
            deleter = ?naming.deleter,
            config_client = config_client.is_some(),
            "Naming node started"
        );

        Ok(Self {
            scheduler,
            registry,
            push,
            switches,
            distro,
            naming_failover,
            config_client,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// 停止所有后台任务，最多等待配置的关闭超时
    pub async fn shutdown(self) -> Result<(), ServerError> {
        if let Some(client) = &self.config_client {
            if let Err(e) = client.shutdown().await {
                tracing::error!(error = %e, "Failed to flush config client on shutdown");
            }
        }
        if let Err(e) = self.naming_failover.dump().await {
            tracing::error!(error = %e, "Failed to dump naming snapshots on shutdown");
        }

        self.scheduler.shutdown(self.shutdown_timeout).await?;
        Ok(())
    }
}

pub async fn start(config: Config) -> Result<(), ServerError> {
    let node = Node::build(&config)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    node.shutdown().await
}
