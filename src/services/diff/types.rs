use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::encoding::{decode_group_key_part, encode_group_key_part};

/// 字段分隔符
pub const WORD_SEPARATOR: char = '\u{2}';
/// 记录分隔符
pub const LINE_SEPARATOR: char = '\u{1}';
/// 单次监听请求允许的最大配置数量
pub const MAX_WATCH_ENTRIES: usize = 10_000;
/// 一条记录在结束符之前允许的最大字段数
pub const MAX_FIELDS_PER_RECORD: usize = 3;
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// 协议错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid protocol, too many fields in one record (max {max})")]
    TooManyFields { max: usize },

    #[error("invalid protocol, too many listeners (max {limit})")]
    TooManyListeners { limit: usize },

    #[error("invalid protocol, record has {fields} field(s), expected 3 or 4")]
    MalformedRecord { fields: usize },

    #[error("invalid group key: {0}")]
    InvalidGroupKey(String),

    #[error("invalid config key: {0}")]
    InvalidKey(String),

    #[error("invalid percent encoding: {0}")]
    InvalidEncoding(String),
}

/// 配置项的三元组标识 (dataId, group, tenant)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    pub data_id: String,
    pub group: String,
    pub tenant: Option<String>,
}

impl ConfigKey {
    /// 创建并校验配置标识，group 为空时使用默认分组
    pub fn new(data_id: &str, group: Option<&str>, tenant: Option<&str>) -> Result<Self, ProtocolError> {
        let data_id = data_id.trim();
        if data_id.is_empty() {
            return Err(ProtocolError::InvalidKey("dataId must not be blank".to_string()));
        }

        let group = match group.map(str::trim) {
            None => DEFAULT_GROUP,
            Some(g) if g.is_empty() => {
                return Err(ProtocolError::InvalidKey("group must not be blank".to_string()));
            }
            Some(g) => g,
        };

        Ok(Self::from_parts(data_id, group, tenant))
    }

    /// 不做校验的构造，空白 tenant 归一化为 None
    pub fn from_parts(data_id: &str, group: &str, tenant: Option<&str>) -> Self {
        Self {
            data_id: data_id.to_string(),
            group: group.to_string(),
            tenant: tenant
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string),
        }
    }

    pub fn tenant_str(&self) -> &str {
        self.tenant.as_deref().unwrap_or("")
    }

    /// 生成 groupKey: dataId+group[+tenant]
    pub fn group_key(&self) -> String {
        let mut sb = String::with_capacity(self.data_id.len() + self.group.len() + 8);
        encode_group_key_part(&self.data_id, &mut sb);
        sb.push('+');
        encode_group_key_part(&self.group, &mut sb);
        if let Some(tenant) = &self.tenant {
            sb.push('+');
            encode_group_key_part(tenant, &mut sb);
        }
        sb
    }

    /// 解析 groupKey，逆向还原 dataId / group / tenant
    pub fn parse_group_key(group_key: &str) -> Result<Self, ProtocolError> {
        let mut parts: Vec<String> = Vec::with_capacity(3);
        let mut current = String::new();
        let mut chars = group_key.chars();

        while let Some(c) = chars.next() {
            match c {
                '+' => {
                    parts.push(std::mem::take(&mut current));
                }
                '%' => {
                    let escaped: String = chars.by_ref().take(2).collect();
                    current.push(decode_group_key_part(&escaped).ok_or_else(|| {
                        ProtocolError::InvalidGroupKey(group_key.to_string())
                    })?);
                }
                other => current.push(other),
            }
        }
        parts.push(current);

        match parts.as_slice() {
            [data_id, group] if !data_id.is_empty() && !group.is_empty() => {
                Ok(Self::from_parts(data_id, group, None))
            }
            [data_id, group, tenant] if !data_id.is_empty() && !group.is_empty() => {
                Ok(Self::from_parts(data_id, group, Some(tenant.as_str())))
            }
            _ => Err(ProtocolError::InvalidGroupKey(group_key.to_string())),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataId={}, group={}, tenant={}", self.data_id, self.group, self.tenant_str())
    }
}

/// 客户端提交的监听集合 (groupKey -> md5)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientWatchSet {
    entries: HashMap<String, String>,
}

impl ClientWatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &ConfigKey, md5: impl Into<String>) -> Option<String> {
        self.entries.insert(key.group_key(), md5.into())
    }

    pub fn insert_group_key(&mut self, group_key: impl Into<String>, md5: impl Into<String>) -> Option<String> {
        self.entries.insert(group_key.into(), md5.into())
    }

    pub fn get(&self, group_key: &str) -> Option<&str> {
        self.entries.get(group_key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }
}

impl From<HashMap<String, String>> for ClientWatchSet {
    fn from(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_round_trip_with_special_chars() {
        let key = ConfigKey::from_parts("app+1%", "grp", Some("ns"));
        let group_key = key.group_key();
        assert_eq!(group_key, "app%2B1%25+grp+ns");
        assert_eq!(ConfigKey::parse_group_key(&group_key).unwrap(), key);
    }

    #[test]
    fn test_blank_tenant_is_dropped() {
        let key = ConfigKey::from_parts("app", "grp", Some("  "));
        assert_eq!(key.tenant, None);
        assert_eq!(key.group_key(), "app+grp");
    }

    #[test]
    fn test_new_defaults_group_and_rejects_blank() {
        let key = ConfigKey::new(" app ", None, None).unwrap();
        assert_eq!(key.data_id, "app");
        assert_eq!(key.group, DEFAULT_GROUP);

        assert!(ConfigKey::new("  ", None, None).is_err());
        assert!(ConfigKey::new("app", Some(" "), None).is_err());
    }

    #[test]
    fn test_parse_group_key_rejects_bad_input() {
        assert!(ConfigKey::parse_group_key("only-one").is_err());
        assert!(ConfigKey::parse_group_key("a+b+c+d").is_err());
        assert!(ConfigKey::parse_group_key("a%ZZ+b").is_err());
    }
}
