use std::sync::Arc;

use dashmap::DashMap;

use super::codec::{decode_watch_set, encode_changed_keys, encode_changed_keys_debug};
use super::types::{ClientWatchSet, ConfigKey, ProtocolError};

/// 计算内容指纹（小写十六进制 md5）
pub fn content_md5(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

/// 服务端配置 md5 缓存 (groupKey -> md5)
#[derive(Debug, Clone, Default)]
pub struct Md5Cache {
    entries: Arc<DashMap<String, String>>,
}

impl Md5Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入配置内容，返回新的 md5
    pub fn update(&self, key: &ConfigKey, content: &str) -> String {
        let md5 = content_md5(content);
        self.update_md5(key.group_key(), md5.clone());
        md5
    }

    pub fn update_md5(&self, group_key: impl Into<String>, md5: impl Into<String>) {
        let group_key = group_key.into();
        let md5 = md5.into();
        tracing::debug!(group_key = %group_key, md5 = %md5, "Updated config md5");
        self.entries.insert(group_key, md5);
    }

    pub fn remove(&self, key: &ConfigKey) -> bool {
        self.entries.remove(&key.group_key()).is_some()
    }

    /// 未知配置的 md5 视为空串
    pub fn content_md5(&self, group_key: &str) -> String {
        self.entries
            .get(group_key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn is_uptodate(&self, group_key: &str, client_md5: &str) -> bool {
        self.content_md5(group_key) == client_md5
    }

    /// 比较客户端与服务端的 md5，返回发生变化的 groupKey
    pub fn compare_md5(&self, watch_set: &ClientWatchSet) -> Vec<String> {
        watch_set
            .iter()
            .filter(|(group_key, client_md5)| !self.is_uptodate(group_key, client_md5))
            .map(|(group_key, _)| group_key.clone())
            .collect()
    }

    /// 处理一次监听请求：解析报文、比较 md5、编码响应
    pub fn handle_listen(&self, wire: &str) -> Result<String, ProtocolError> {
        let watch_set = decode_watch_set(wire)?;
        let changed = self.compare_md5(&watch_set);

        let keys = changed
            .iter()
            .map(|group_key| ConfigKey::parse_group_key(group_key))
            .collect::<Result<Vec<_>, _>>()?;

        if !keys.is_empty() {
            tracing::debug!(
                watched = watch_set.len(),
                changed = keys.len(),
                keys = %encode_changed_keys_debug(&keys),
                "Config change detected for listener"
            );
        }

        Ok(encode_changed_keys(&keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_md5_is_lower_hex() {
        assert_eq!(content_md5("hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_unknown_key_matches_empty_md5() {
        let cache = Md5Cache::new();
        assert!(cache.is_uptodate("app+grp", ""));
        assert!(!cache.is_uptodate("app+grp", "abc"));
    }
}
