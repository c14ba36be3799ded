use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 调度器错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler is shut down")]
    ShutDown,

    #[error("Shutdown timed out after {0:?} with tasks still running")]
    ShutdownTimeout(Duration),
}

/// 后台任务调度器
///
/// 支持固定延迟的周期任务和一次性延迟任务，所有任务共享同一个
/// `TaskTracker`，关闭时统一取消并限时等待。
#[derive(Debug, Clone)]
pub struct Scheduler {
    name: String,
    tracker: Arc<TaskTracker>,
    shutdown: CancellationToken,
    // 任务名 -> (任务编号, 取消令牌)
    tasks: Arc<DashMap<String, (u64, CancellationToken)>>,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracker: Arc::new(TaskTracker::new()),
            shutdown: CancellationToken::new(),
            tasks: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 按固定延迟重复执行任务，同名任务会先被取消
    ///
    /// 单次执行中的 panic 会被捕获并记录，不影响后续调度。
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        task_name: impl Into<String>,
        initial_delay: Duration,
        delay: Duration,
        task: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(SchedulerError::ShutDown);
        }

        let task_name = task_name.into();
        let (_, token) = self.register(&task_name);
        let scheduler_name = self.name.clone();

        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }

            loop {
                if let Err(panic) = AssertUnwindSafe(task()).catch_unwind().await {
                    tracing::error!(
                        scheduler = %scheduler_name,
                        task_name = %task_name,
                        panic = %panic_message(&*panic),
                        "Scheduled task panicked, keeping schedule"
                    );
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            tracing::debug!(scheduler = %scheduler_name, task_name = %task_name, "Recurring task stopped");
        });

        Ok(())
    }

    /// 延迟执行一次
    pub fn schedule_once<Fut>(
        &self,
        task_name: impl Into<String>,
        delay: Duration,
        task: Fut,
    ) -> Result<JoinHandle<()>, SchedulerError>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(SchedulerError::ShutDown);
        }

        let task_name = task_name.into();
        let (id, token) = self.register(&task_name);
        let tasks = self.tasks.clone();
        let scheduler_name = self.name.clone();

        Ok(self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                tracing::error!(
                    scheduler = %scheduler_name,
                    task_name = %task_name,
                    panic = %panic_message(&*panic),
                    "One-shot task panicked"
                );
            }
            // 同名任务可能已被新任务替换，只移除自己的登记
            tasks.remove_if(&task_name, |_, (current, _)| *current == id);
        }))
    }

    /// 直接提交一个后台任务（不参与按名取消，但受关闭信号约束）
    pub fn spawn<Fut>(&self, task: Fut) -> JoinHandle<Option<Fut::Output>>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let token = self.shutdown.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => None,
                output = task => Some(output),
            }
        })
    }

    /// 取消指定名称的任务
    pub fn cancel(&self, task_name: &str) -> bool {
        if let Some((_, (_, token))) = self.tasks.remove(task_name) {
            token.cancel();
            tracing::debug!(scheduler = %self.name, task_name = %task_name, "Cancelled scheduled task");
            true
        } else {
            false
        }
    }

    pub fn is_scheduled(&self, task_name: &str) -> bool {
        self.tasks.contains_key(task_name)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// 停止所有任务并在限定时间内等待其结束
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SchedulerError> {
        tracing::info!(scheduler = %self.name, tasks = self.tasks.len(), "Scheduler shutdown begin");

        self.shutdown.cancel();
        self.tasks.clear();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!(scheduler = %self.name, "Scheduler shutdown complete");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    scheduler = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Scheduler shutdown timed out"
                );
                Err(SchedulerError::ShutdownTimeout(timeout))
            }
        }
    }

    fn register(&self, task_name: &str) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();
        if let Some((_, previous)) = self.tasks.insert(task_name.to_string(), (id, token.clone())) {
            previous.cancel();
        }
        (id, token)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
