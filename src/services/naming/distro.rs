use std::sync::Arc;

use arc_swap::ArcSwap;

/// 分片归属判断：同一时刻集群内只有一个节点负责某个服务
pub trait DistroMapper: Send + Sync {
    fn responsible(&self, service_name: &str) -> bool;
}

/// 按服务名哈希映射到排序后的成员列表
#[derive(Debug)]
pub struct HashDistroMapper {
    local_address: String,
    members: ArcSwap<Vec<String>>,
}

impl HashDistroMapper {
    pub fn new(local_address: impl Into<String>, members: Vec<String>) -> Self {
        let mapper = Self {
            local_address: local_address.into(),
            members: ArcSwap::from_pointee(Vec::new()),
        };
        mapper.update_members(members);
        mapper
    }

    /// 单机模式，本节点负责全部服务
    pub fn standalone(local_address: impl Into<String>) -> Self {
        let local_address = local_address.into();
        Self::new(local_address.clone(), vec![local_address])
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn members(&self) -> Arc<Vec<String>> {
        self.members.load_full()
    }

    /// 替换健康成员列表，所有节点需看到相同顺序
    pub fn update_members(&self, mut members: Vec<String>) {
        members.sort();
        members.dedup();
        if members.is_empty() {
            tracing::warn!(local_address = %self.local_address, "Distro member list is empty");
        } else {
            tracing::info!(members = ?members, "Updated distro member list");
        }
        self.members.store(Arc::new(members));
    }

    /// 负责该服务的成员地址
    pub fn map_server(&self, service_name: &str) -> Option<String> {
        let members = self.members.load();
        if members.is_empty() {
            return None;
        }
        members.get(distro_hash(service_name) % members.len()).cloned()
    }
}

impl DistroMapper for HashDistroMapper {
    fn responsible(&self, service_name: &str) -> bool {
        let members = self.members.load();
        if members.is_empty() {
            return false;
        }

        // 本节点不在列表中（尚未加入或刚被摘除）时保守地自行检查
        let Some(index) = members.iter().position(|m| *m == self.local_address) else {
            return true;
        };
        let last_index = members
            .iter()
            .rposition(|m| *m == self.local_address)
            .unwrap_or(index);

        let target = distro_hash(service_name) % members.len();
        target >= index && target <= last_index
    }
}

/// 与其他语言客户端一致的 31 进制字符串哈希
pub fn distro_hash(service_name: &str) -> usize {
    let hash = service_name
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32));
    (hash % i32::MAX).unsigned_abs() as usize
}
