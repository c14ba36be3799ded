use std::sync::atomic::{AtomicBool, Ordering};

/// 集群级开关，运行期可修改
#[derive(Debug)]
pub struct HealthSwitches {
    use_new_protocol: AtomicBool,
    health_check_enabled: AtomicBool,
    expire_instance: AtomicBool,
}

impl HealthSwitches {
    pub fn new(use_new_protocol: bool, health_check_enabled: bool, expire_instance: bool) -> Self {
        Self {
            use_new_protocol: AtomicBool::new(use_new_protocol),
            health_check_enabled: AtomicBool::new(health_check_enabled),
            expire_instance: AtomicBool::new(expire_instance),
        }
    }

    /// 新协议下心跳检查由其他组件负责
    pub fn use_new_protocol(&self) -> bool {
        self.use_new_protocol.load(Ordering::Acquire)
    }

    pub fn health_check_enabled(&self) -> bool {
        self.health_check_enabled.load(Ordering::Acquire)
    }

    pub fn expire_instance(&self) -> bool {
        self.expire_instance.load(Ordering::Acquire)
    }

    pub fn set_use_new_protocol(&self, on: bool) {
        self.use_new_protocol.store(on, Ordering::Release);
        tracing::info!(use_new_protocol = on, "Updated naming switch");
    }

    pub fn set_health_check_enabled(&self, on: bool) {
        self.health_check_enabled.store(on, Ordering::Release);
        tracing::info!(health_check_enabled = on, "Updated naming switch");
    }

    pub fn set_expire_instance(&self, on: bool) {
        self.expire_instance.store(on, Ordering::Release);
        tracing::info!(expire_instance = on, "Updated naming switch");
    }
}

impl Default for HealthSwitches {
    fn default() -> Self {
        Self::new(false, true, true)
    }
}
