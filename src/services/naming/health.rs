use std::sync::Arc;
use std::time::Duration;

use super::deleter::{DeleteInstanceRequest, InstanceDeleter};
use super::distro::DistroMapper;
use super::push::PushService;
use super::switches::HealthSwitches;
use super::types::{Service, now_millis};
use crate::services::scheduler::{Scheduler, SchedulerError};

/// 心跳检查任务的协作者
pub struct HealthCheckContext {
    pub distro: Arc<dyn DistroMapper>,
    pub switches: Arc<HealthSwitches>,
    pub push: Arc<dyn PushService>,
    pub deleter: Arc<dyn InstanceDeleter>,
    /// 删除请求在其上异步执行
    pub scheduler: Scheduler,
}

/// 提前返回的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NewProtocol,
    NotResponsible,
    HealthCheckDisabled,
}

fn beat_check_key(service: &Service) -> String {
    format!("beat-check-{}", service.service_key())
}

/// 一次检查的结果
#[derive(Debug, Default, PartialEq)]
pub struct CheckOutcome {
    pub skipped: Option<SkipReason>,
    /// 本次被标记为不健康的实例键
    pub marked_unhealthy: Vec<String>,
    /// 本次需要删除的实例
    pub expired: Vec<DeleteInstanceRequest>,
}

/// 单个服务的客户端心跳检查
#[derive(Clone)]
pub struct ClientBeatCheckTask {
    service: Arc<Service>,
    ctx: Arc<HealthCheckContext>,
}

impl ClientBeatCheckTask {
    pub fn new(service: Arc<Service>, ctx: Arc<HealthCheckContext>) -> Self {
        Self { service, ctx }
    }

    pub fn task_key(&self) -> String {
        beat_check_key(&self.service)
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// 执行一次检查，并把删除请求交给调度器异步发送
    pub async fn run(&self) -> CheckOutcome {
        let outcome = self.check_at(now_millis());
        for request in &outcome.expired {
            self.submit_delete(request.clone());
        }
        outcome
    }

    /// 按给定时间检查全部实例，状态翻转与推送在这里完成
    pub fn check_at(&self, now_ms: u64) -> CheckOutcome {
        let switches = &self.ctx.switches;
        let service_name = &self.service.name;

        if switches.use_new_protocol() {
            return CheckOutcome::skipped(SkipReason::NewProtocol);
        }
        if !self.ctx.distro.responsible(service_name) {
            return CheckOutcome::skipped(SkipReason::NotResponsible);
        }
        if !switches.health_check_enabled() {
            return CheckOutcome::skipped(SkipReason::HealthCheckDisabled);
        }

        let mut outcome = CheckOutcome::default();
        let expire_instance = switches.expire_instance();

        for mut entry in self.service.instances.iter_mut() {
            let instance = entry.value_mut();
            if instance.marked {
                continue;
            }

            if instance.healthy && instance.is_beat_timed_out(now_ms) {
                instance.healthy = false;
                tracing::info!(
                    service_name = %service_name,
                    ip = %instance.ip,
                    port = instance.port,
                    cluster = %instance.cluster_name,
                    elapsed_ms = instance.beat_elapsed(now_ms),
                    timeout_ms = instance.heartbeat_timeout_ms,
                    "Instance heartbeat timed out, marking unhealthy"
                );
                outcome.marked_unhealthy.push(instance.instance_key());
            }

            if expire_instance && instance.is_delete_timed_out(now_ms) {
                tracing::info!(
                    service_name = %service_name,
                    ip = %instance.ip,
                    port = instance.port,
                    elapsed_ms = instance.beat_elapsed(now_ms),
                    timeout_ms = instance.ip_delete_timeout_ms,
                    "Instance expired, requesting removal"
                );
                outcome.expired.push(DeleteInstanceRequest {
                    ip: instance.ip.clone(),
                    port: instance.port,
                    ephemeral: true,
                    cluster_name: instance.cluster_name.clone(),
                    service_name: service_name.clone(),
                    namespace_id: self.service.namespace_id.clone(),
                });
            }
        }

        // 推送在释放实例锁之后进行，每次状态翻转推送一次
        for _ in &outcome.marked_unhealthy {
            self.ctx.push.service_changed(&self.service);
        }
        outcome
    }

    fn submit_delete(&self, request: DeleteInstanceRequest) {
        let delete = self.ctx.deleter.delete_instance(request.clone());

        let handle = self.ctx.scheduler.spawn(delete);
        tokio::spawn(async move {
            match handle.await {
                Ok(Some(Ok(()))) => {
                    tracing::info!(
                        service_name = %request.service_name,
                        ip = %request.ip,
                        port = request.port,
                        "Removed expired instance"
                    );
                }
                Ok(Some(Err(e))) => {
                    tracing::error!(
                        service_name = %request.service_name,
                        ip = %request.ip,
                        port = request.port,
                        error = %e,
                        "Failed to remove expired instance"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        service_name = %request.service_name,
                        ip = %request.ip,
                        error = %e,
                        "Expired instance removal task failed"
                    );
                }
                Ok(None) => {
                    tracing::warn!(
                        service_name = %request.service_name,
                        ip = %request.ip,
                        port = request.port,
                        "Expired instance removal cancelled"
                    );
                }
            }
        });
    }
}

impl CheckOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

/// 为每个服务维护一个固定间隔的心跳检查任务
pub struct HealthCheckReactor {
    ctx: Arc<HealthCheckContext>,
    interval: Duration,
}

impl HealthCheckReactor {
    pub fn new(ctx: Arc<HealthCheckContext>, interval: Duration) -> Self {
        Self { ctx, interval }
    }

    pub fn context(&self) -> &Arc<HealthCheckContext> {
        &self.ctx
    }

    /// 为服务启动心跳检查
    ///
    /// 同一服务只会存在一个检查任务，旧任务会被取消并由检查这个 `service` 的新任务替换。
    pub fn schedule_check(&self, service: Arc<Service>) -> Result<(), SchedulerError> {
        let task = ClientBeatCheckTask::new(service, self.ctx.clone());
        let task_key = task.task_key();

        self.ctx
            .scheduler
            .schedule_with_fixed_delay(task_key.clone(), self.interval, self.interval, move || {
                let task = task.clone();
                async move {
                    task.run().await;
                }
            })?;

        tracing::debug!(task_key = %task_key, interval_ms = self.interval.as_millis() as u64, "Scheduled beat check");
        Ok(())
    }

    pub fn cancel_check(&self, service: &Service) -> bool {
        self.ctx.scheduler.cancel(&beat_check_key(service))
    }

    pub fn is_scheduled(&self, service: &Service) -> bool {
        self.ctx.scheduler.is_scheduled(&beat_check_key(service))
    }
}
