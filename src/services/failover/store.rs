use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use arc_swap::ArcSwap;

use super::types::{FAILOVER_SWITCH, FailoverError, FailoverStoreConfig, Snapshot, SnapshotSource};
use crate::services::diff::encoding::form_encode;
use crate::services::scheduler::{Scheduler, SchedulerError};

/// 基于磁盘的容灾缓存
///
/// 读路径只访问内存；磁盘读取只发生在开关刷新触发的重新加载中，
/// 新表组装完成后整体替换，读线程不会看到半成品。
pub struct FailoverStore<T: Snapshot> {
    name: String,
    failover_dir: PathBuf,
    config: FailoverStoreConfig,
    source: Arc<dyn SnapshotSource<T>>,
    snapshots: ArcSwap<HashMap<String, T>>,
    failover_mode: AtomicBool,
    // 开关文件上次读取时的修改时间（纳秒）
    switch_modified: AtomicU64,
}

impl<T: Snapshot> FailoverStore<T> {
    pub fn new(
        name: impl Into<String>,
        failover_dir: impl Into<PathBuf>,
        config: FailoverStoreConfig,
        source: Arc<dyn SnapshotSource<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            failover_dir: failover_dir.into(),
            config,
            source,
            snapshots: ArcSwap::from_pointee(HashMap::new()),
            failover_mode: AtomicBool::new(false),
            switch_modified: AtomicU64::new(0),
        }
    }

    pub fn failover_dir(&self) -> &Path {
        &self.failover_dir
    }

    pub fn switch_file(&self) -> PathBuf {
        self.failover_dir.join(FAILOVER_SWITCH)
    }

    pub fn is_failover_on(&self) -> bool {
        self.failover_mode.load(Ordering::Acquire)
    }

    /// 启动开关轮询、每日全量落盘以及启动时的兜底落盘
    pub fn start(self: &Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        let store = self.clone();
        scheduler.schedule_with_fixed_delay(
            format!("{}-failover-switch", self.name),
            std::time::Duration::ZERO,
            self.config.switch_refresh_interval,
            move || {
                let store = store.clone();
                async move {
                    if let Err(e) = store.refresh_switch().await {
                        tracing::error!(store = %store.name, error = %e, "Failed to read failover switch");
                    }
                }
            },
        )?;

        let store = self.clone();
        scheduler.schedule_with_fixed_delay(
            format!("{}-failover-dump", self.name),
            self.config.dump_initial_delay,
            self.config.dump_interval,
            move || {
                let store = store.clone();
                async move {
                    if let Err(e) = store.dump().await {
                        tracing::error!(store = %store.name, error = %e, "Failed to dump failover snapshots");
                    }
                }
            },
        )?;

        let store = self.clone();
        scheduler.schedule_once(
            format!("{}-failover-bootstrap", self.name),
            self.config.bootstrap_delay,
            async move {
                if let Err(e) = store.bootstrap_if_empty().await {
                    tracing::error!(store = %store.name, error = %e, "Failed to backup snapshots on startup");
                }
            },
        )?;

        tracing::info!(
            store = %self.name,
            failover_dir = %self.failover_dir.display(),
            "Failover store started"
        );
        Ok(())
    }

    /// 只在容灾模式开启时返回内存中的快照
    pub fn read(&self, key: &str) -> Option<T> {
        if !self.is_failover_on() {
            return None;
        }
        self.snapshots.load().get(key).cloned()
    }

    pub fn cached_keys(&self) -> Vec<String> {
        self.snapshots.load().keys().cloned().collect()
    }

    /// 检查开关文件，修改时间未前进时跳过
    pub async fn refresh_switch(&self) -> Result<(), FailoverError> {
        let switch_file = self.switch_file();
        let metadata = match tokio::fs::metadata(&switch_file).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.set_mode(false);
                tracing::debug!(store = %self.name, "Failover switch is not found");
                return Ok(());
            }
            Err(e) => return Err(FailoverError::io(&switch_file, e)),
        };

        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();

        if modified <= self.switch_modified.load(Ordering::Acquire) {
            return Ok(());
        }
        self.switch_modified.store(modified, Ordering::Release);

        let content = tokio::fs::read_to_string(&switch_file)
            .await
            .map_err(|e| FailoverError::io(&switch_file, e))?;

        let mut switched_on = false;
        for line in content.lines().map(str::trim) {
            match line {
                "1" => switched_on = true,
                "0" => switched_on = false,
                _ => {}
            }
        }

        if switched_on {
            self.set_mode(true);
            tracing::info!(store = %self.name, "Failover mode is on");
            self.reload().await?;
        } else {
            self.set_mode(false);
            tracing::info!(store = %self.name, "Failover mode is off");
        }
        Ok(())
    }

    /// 从磁盘重新加载全部快照，单个文件失败不影响其他文件
    pub async fn reload(&self) -> Result<usize, FailoverError> {
        self.ensure_dir().await?;

        let mut entries = tokio::fs::read_dir(&self.failover_dir)
            .await
            .map_err(|e| FailoverError::io(&self.failover_dir, e))?;

        let mut loaded: HashMap<String, T> = HashMap::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(store = %self.name, error = %e, "Failed to read failover dir entry");
                    break;
                }
            };

            if entry.file_name() == FAILOVER_SWITCH {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => {}
                _ => continue,
            }

            let path = entry.path();
            match Self::read_snapshot_file(&path).await {
                Ok(Some(snapshot)) if snapshot.has_payload() => {
                    loaded.insert(snapshot.key(), snapshot);
                }
                Ok(_) => {
                    tracing::debug!(store = %self.name, file = %path.display(), "Skipping empty failover snapshot");
                }
                Err(e) => {
                    tracing::error!(
                        store = %self.name,
                        file = %path.display(),
                        error = %e,
                        "Failed to read failover snapshot"
                    );
                }
            }
        }

        let count = loaded.len();
        if count > 0 {
            self.snapshots.store(Arc::new(loaded));
        }
        tracing::info!(store = %self.name, loaded = count, "Reloaded failover snapshots");
        Ok(count)
    }

    /// 落盘当前视图，跳过保留条目
    pub async fn write_all(&self, view: &HashMap<String, T>) -> Result<usize, FailoverError> {
        self.ensure_dir().await?;

        let mut written = 0;
        for snapshot in view.values() {
            if snapshot.is_reserved() {
                continue;
            }

            let path = self.failover_dir.join(form_encode(&snapshot.key()));
            let mut line = serde_json::to_string(snapshot)?;
            line.push('\n');

            match tokio::fs::write(&path, line).await {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::error!(
                        store = %self.name,
                        file = %path.display(),
                        error = %e,
                        "Failed to write failover snapshot"
                    );
                }
            }
        }

        tracing::debug!(store = %self.name, written, "Wrote failover snapshots");
        Ok(written)
    }

    /// 从数据来源取当前视图并落盘
    pub async fn dump(&self) -> Result<usize, FailoverError> {
        let view = self.source.snapshot_view();
        self.write_all(&view).await
    }

    /// 目录为空或不存在时立即落盘一次
    pub async fn bootstrap_if_empty(&self) -> Result<bool, FailoverError> {
        self.ensure_dir().await?;

        let mut entries = tokio::fs::read_dir(&self.failover_dir)
            .await
            .map_err(|e| FailoverError::io(&self.failover_dir, e))?;
        let is_empty = entries
            .next_entry()
            .await
            .map_err(|e| FailoverError::io(&self.failover_dir, e))?
            .is_none();

        if is_empty {
            self.dump().await?;
        }
        Ok(is_empty)
    }

    /// 运维手动切换容灾开关
    pub async fn set_failover_switch(&self, on: bool) -> Result<(), FailoverError> {
        self.ensure_dir().await?;
        let switch_file = self.switch_file();
        tokio::fs::write(&switch_file, if on { "1" } else { "0" })
            .await
            .map_err(|e| FailoverError::io(&switch_file, e))
    }

    fn set_mode(&self, on: bool) {
        self.failover_mode.store(on, Ordering::Release);
    }

    async fn ensure_dir(&self) -> Result<(), FailoverError> {
        tokio::fs::create_dir_all(&self.failover_dir)
            .await
            .map_err(|e| FailoverError::io(&self.failover_dir, e))
    }

    async fn read_snapshot_file(path: &Path) -> Result<Option<T>, FailoverError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FailoverError::io(path, e))?;

        match content.lines().next().map(str::trim).filter(|l| !l.is_empty()) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }
}
