use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::deleter::{DeleteError, DeleteTask};
use super::health::HealthCheckReactor;
use super::push::PushService;
use super::types::{
    Instance, NamingConfig, RegistryError, Service, ServiceInfo, instance_key, now_millis, service_key,
};
use crate::services::failover::{Snapshot, SnapshotSource};

/// 实时实例注册表
pub struct ServiceRegistry {
    /// namespace##service -> 服务
    services: DashMap<String, Arc<Service>>,
    reactor: HealthCheckReactor,
    push: Arc<dyn PushService>,
    // 调用方未指定时使用的命名空间和实例超时
    default_namespace: String,
    heartbeat_timeout: Duration,
    ip_delete_timeout: Duration,
}

impl ServiceRegistry {
    pub fn new(reactor: HealthCheckReactor, push: Arc<dyn PushService>) -> Self {
        let defaults = NamingConfig::default();
        Self {
            services: DashMap::new(),
            reactor,
            push,
            default_namespace: defaults.namespace_id,
            heartbeat_timeout: defaults.heartbeat_timeout,
            ip_delete_timeout: defaults.ip_delete_timeout,
        }
    }

    /// 采用命名配置中的默认命名空间和实例超时
    pub fn with_naming_config(mut self, config: &NamingConfig) -> Self {
        self.default_namespace = config.namespace_id.clone();
        self.heartbeat_timeout = config.heartbeat_timeout;
        self.ip_delete_timeout = config.ip_delete_timeout;
        self
    }

    pub fn reactor(&self) -> &HealthCheckReactor {
        &self.reactor
    }

    /// 注册实例，新服务会同时启动心跳检查
    ///
    /// 实例超时取自命名配置，元数据中的 `preserved.*` 保留键可以单独覆盖。
    pub fn register_instance(
        &self,
        namespace_id: &str,
        service_name: &str,
        instance: Instance,
    ) -> Result<(), RegistryError> {
        let namespace_id = self.namespace(namespace_id);
        let mut instance = instance.with_timeouts(self.heartbeat_timeout, self.ip_delete_timeout);
        if service_name.trim().is_empty() {
            return Err(RegistryError::InvalidInstance("service name is blank".to_string()));
        }
        if instance.ip.trim().is_empty() || instance.port == 0 {
            return Err(RegistryError::InvalidInstance(format!("{}:{}", instance.ip, instance.port)));
        }
        if instance.heartbeat_timeout_ms > instance.ip_delete_timeout_ms {
            return Err(RegistryError::InvalidInstance(
                "heartbeat timeout must not exceed ip delete timeout".to_string(),
            ));
        }

        let key = service_key(namespace_id, service_name);
        let mut created = false;
        // 持有条目锁直到实例写入，与注销时移除空服务互斥
        let entry = self.services.entry(key).or_insert_with(|| {
            created = true;
            Arc::new(Service::new(namespace_id, service_name))
        });
        let service = entry.value().clone();

        if created || !self.reactor.is_scheduled(&service) {
            self.reactor.schedule_check(service.clone())?;
        }

        instance.last_beat = now_millis();
        tracing::info!(
            namespace_id = %namespace_id,
            service_name = %service_name,
            ip = %instance.ip,
            port = instance.port,
            cluster = %instance.cluster_name,
            heartbeat_timeout_ms = instance.heartbeat_timeout_ms,
            "Registered instance"
        );
        service.instances.insert(instance.instance_key(), instance);
        drop(entry);

        self.push.service_changed(&service);
        Ok(())
    }

    /// 处理客户端心跳，不健康且未被标记的实例恢复为健康
    pub fn process_beat(
        &self,
        namespace_id: &str,
        service_name: &str,
        ip: &str,
        port: u16,
        cluster_name: &str,
    ) -> Result<(), RegistryError> {
        let service = self
            .get_service(namespace_id, service_name)
            .ok_or_else(|| RegistryError::ServiceNotFound(service_key(namespace_id, service_name)))?;

        let key = instance_key(ip, port, cluster_name);
        let recovered = {
            let mut instance = service
                .instances
                .get_mut(&key)
                .ok_or_else(|| RegistryError::InstanceNotFound {
                    service: service_name.to_string(),
                    instance: key.clone(),
                })?;

            instance.last_beat = now_millis();
            if !instance.marked && !instance.healthy {
                instance.healthy = true;
                true
            } else {
                false
            }
        };

        if recovered {
            tracing::info!(
                service_name = %service_name,
                instance = %key,
                "Instance recovered by client beat, marking healthy"
            );
            self.push.service_changed(&service);
        }
        Ok(())
    }

    /// 注销实例，服务变空时移除服务并停止检查任务
    pub fn deregister_instance(
        &self,
        namespace_id: &str,
        service_name: &str,
        ip: &str,
        port: u16,
        cluster_name: &str,
    ) -> bool {
        let Some(service) = self.get_service(namespace_id, service_name) else {
            return false;
        };

        let key = instance_key(ip, port, cluster_name);
        if service.instances.remove(&key).is_none() {
            return false;
        }
        tracing::info!(service_name = %service_name, instance = %key, "Deregistered instance");
        self.push.service_changed(&service);

        // 在分片锁内取消检查，并发注册只会看到被移除前的服务或一个全新的服务
        let removed = self.services.remove_if(&service.service_key(), |_, current| {
            if Arc::ptr_eq(current, &service) && current.instances.is_empty() {
                self.reactor.cancel_check(current);
                true
            } else {
                false
            }
        });
        if removed.is_some() {
            tracing::info!(service_name = %service_name, "Removed empty service");
        }
        true
    }

    pub fn get_service(&self, namespace_id: &str, service_name: &str) -> Option<Arc<Service>> {
        self.services
            .get(&service_key(self.namespace(namespace_id), service_name))
            .map(|entry| entry.value().clone())
    }

    pub fn service_info(&self, namespace_id: &str, service_name: &str, clusters: &[&str]) -> Option<ServiceInfo> {
        self.get_service(namespace_id, service_name)
            .map(|service| service.to_service_info(clusters))
    }

    pub fn list_services(&self, namespace_id: &str) -> Vec<String> {
        let namespace_id = self.namespace(namespace_id);
        let mut names: Vec<String> = self
            .services
            .iter()
            .filter(|entry| entry.value().namespace_id == namespace_id)
            .map(|entry| entry.value().name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    fn namespace<'a>(&'a self, namespace_id: &'a str) -> &'a str {
        if namespace_id.trim().is_empty() {
            &self.default_namespace
        } else {
            namespace_id
        }
    }

    /// 消费进程内删除队列，直到发送端全部关闭
    pub async fn serve_deletions(self: Arc<Self>, mut rx: mpsc::Receiver<DeleteTask>) {
        while let Some((request, done)) = rx.recv().await {
            let removed = self.deregister_instance(
                &request.namespace_id,
                &request.service_name,
                &request.ip,
                request.port,
                &request.cluster_name,
            );
            let result = if removed {
                Ok(())
            } else {
                Err(DeleteError::NotFound(instance_key(&request.ip, request.port, &request.cluster_name)))
            };
            let _ = done.send(result);
        }
        tracing::debug!("Local delete queue closed");
    }
}

impl SnapshotSource<ServiceInfo> for ServiceRegistry {
    fn snapshot_view(&self) -> HashMap<String, ServiceInfo> {
        self.services
            .iter()
            .map(|entry| entry.value().to_service_info(&[]))
            .map(|info| (info.key(), info))
            .collect()
    }
}
