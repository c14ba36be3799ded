use std::path::{Path, PathBuf};

use crate::services::diff::ConfigKey;
use crate::services::diff::encoding::form_encode;

/// 最近一次成功拉取的配置快照（常开，与运维控制的容灾开关无关）
#[derive(Debug, Clone)]
pub struct LocalSnapshotStore {
    root: PathBuf,
}

impl LocalSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// snapshot/{group}/{dataId} 或 snapshot-tenant/{tenant}/{group}/{dataId}
    pub fn snapshot_path(&self, key: &ConfigKey) -> PathBuf {
        let base = match &key.tenant {
            Some(tenant) => self.root.join("snapshot-tenant").join(path_segment(tenant)),
            None => self.root.join("snapshot"),
        };
        base.join(path_segment(&key.group)).join(path_segment(&key.data_id))
    }

    pub async fn get(&self, key: &ConfigKey) -> Result<Option<String>, std::io::Error> {
        match tokio::fs::read_to_string(self.snapshot_path(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 内容为 None 时删除快照
    pub async fn save(&self, key: &ConfigKey, content: Option<&str>) -> Result<(), std::io::Error> {
        let path = self.snapshot_path(key);
        match content {
            Some(content) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, content).await
            }
            None => match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            },
        }
    }
}

// 编码后仍可能是 "." 或 ".."，需要额外转义
fn path_segment(part: &str) -> String {
    let encoded = form_encode(part);
    if encoded.chars().all(|c| c == '.') {
        encoded.replace('.', "%2E")
    } else {
        encoded
    }
}
