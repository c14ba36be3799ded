use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use super::types::{Service, service_key};

/// 服务变更通知
pub trait PushService: Send + Sync {
    fn service_changed(&self, service: &Service);
}

/// 服务变更事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceChangeEvent {
    pub event_id: String,
    pub namespace_id: String,
    pub service_name: String,
    pub healthy_count: usize,
    pub instance_count: usize,
    pub timestamp: i64,
}

/// 推送错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("Subscriber lagged behind, {0} events skipped")]
    Lagged(u64),
}

/// 推送统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushStats {
    pub events_published: u64,
    pub events_delivered: u64,
    /// 无订阅者而未送达的事件
    pub events_dropped: u64,
    pub active_channels: usize,
}

/// 推送配置
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub channel_capacity: usize,
    pub enable_metrics: bool,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            enable_metrics: true,
        }
    }
}

/// 基于 Tokio broadcast 的推送服务，每个服务一个通道
#[derive(Debug)]
pub struct BroadcastPushService {
    /// namespace##service -> 广播发送器
    channels: Arc<DashMap<String, broadcast::Sender<ServiceChangeEvent>>>,
    stats: Arc<Mutex<PushStats>>,
    config: PushConfig,
}

impl BroadcastPushService {
    pub fn new(config: PushConfig) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            stats: Arc::new(Mutex::new(PushStats::default())),
            config,
        }
    }

    /// 订阅某个服务的变更事件
    pub fn subscribe(
        &self,
        namespace_id: &str,
        service_name: &str,
    ) -> impl Stream<Item = Result<ServiceChangeEvent, PushError>> + use<> {
        let receiver = self.get_or_create_channel(&service_key(namespace_id, service_name)).subscribe();

        tracing::info!(
            namespace_id = %namespace_id,
            service_name = %service_name,
            "New push subscription created"
        );

        BroadcastStream::new(receiver).map(|result| {
            result.map_err(|err| match err {
                BroadcastStreamRecvError::Lagged(skipped) => PushError::Lagged(skipped),
            })
        })
    }

    pub fn publish(&self, event: ServiceChangeEvent) -> usize {
        let sender = self.get_or_create_channel(&service_key(&event.namespace_id, &event.service_name));

        match sender.send(event.clone()) {
            Ok(subscriber_count) => {
                self.record(|stats| {
                    stats.events_published += 1;
                    stats.events_delivered += subscriber_count as u64;
                });
                tracing::debug!(
                    service_name = %event.service_name,
                    event_id = %event.event_id,
                    subscriber_count,
                    "Pushed service change"
                );
                subscriber_count
            }
            Err(_) => {
                self.record(|stats| {
                    stats.events_published += 1;
                    stats.events_dropped += 1;
                });
                tracing::debug!(
                    service_name = %event.service_name,
                    event_id = %event.event_id,
                    "No active subscribers for service change"
                );
                0
            }
        }
    }

    pub fn get_stats(&self) -> PushStats {
        let base = self.stats.lock().map(|s| s.clone()).unwrap_or_default();
        PushStats {
            active_channels: self.channels.len(),
            ..base
        }
    }

    /// 清理没有订阅者的通道
    pub fn cleanup_inactive_channels(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        let removed = before.saturating_sub(self.channels.len());
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up inactive push channels");
        }
        removed
    }

    fn get_or_create_channel(&self, key: &str) -> broadcast::Sender<ServiceChangeEvent> {
        if let Some(sender) = self.channels.get(key) {
            return sender.clone();
        }
        self.channels
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(
                    channel = %key,
                    capacity = self.config.channel_capacity,
                    "Created new push channel"
                );
                broadcast::channel(self.config.channel_capacity).0
            })
            .clone()
    }

    fn record(&self, update: impl FnOnce(&mut PushStats)) {
        if !self.config.enable_metrics {
            return;
        }
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}

impl Default for BroadcastPushService {
    fn default() -> Self {
        Self::new(PushConfig::default())
    }
}

impl PushService for BroadcastPushService {
    fn service_changed(&self, service: &Service) {
        let healthy_count = service.instances.iter().filter(|entry| entry.healthy).count();
        let event = ServiceChangeEvent {
            event_id: Uuid::new_v4().to_string(),
            namespace_id: service.namespace_id.clone(),
            service_name: service.name.clone(),
            healthy_count,
            instance_count: service.instances.len(),
            timestamp: SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
        };
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::naming::types::Instance;

    #[tokio::test]
    async fn test_subscriber_receives_service_change() {
        let push = BroadcastPushService::default();
        let mut stream = Box::pin(push.subscribe("public", "orders"));

        let service = Service::new("public", "orders");
        let instance = Instance::new("10.0.0.1", 8080, None);
        service.instances.insert(instance.instance_key(), instance);
        push.service_changed(&service);

        let event = stream.next().await.expect("stream closed").expect("lagged");
        assert_eq!(event.service_name, "orders");
        assert_eq!(event.healthy_count, 1);

        let stats = push.get_stats();
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.events_delivered, 1);
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let push = BroadcastPushService::default();
        push.service_changed(&Service::new("public", "orders"));
        assert_eq!(push.get_stats().events_dropped, 1);
        assert_eq!(push.cleanup_inactive_channels(), 1);
    }
}
