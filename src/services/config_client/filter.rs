use std::sync::Arc;

use super::error::ConfigError;
use super::types::{ConfigRequest, ConfigResponse};

/// 配置内容过滤器（加解密、装饰等由外部实现）
pub trait ConfigFilter: Send + Sync {
    fn name(&self) -> &str;

    /// 数值越小越先执行
    fn order(&self) -> i32;

    fn filter_request(&self, _request: &mut ConfigRequest) -> Result<(), ConfigError> {
        Ok(())
    }

    fn filter_response(&self, _response: &mut ConfigResponse) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// 按 order 排序的过滤链
#[derive(Clone, Default)]
pub struct ConfigFilterChain {
    filters: Vec<Arc<dyn ConfigFilter>>,
}

impl ConfigFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加过滤器，同名过滤器只保留第一个
    pub fn add_filter(&mut self, filter: Arc<dyn ConfigFilter>) -> &mut Self {
        if self.filters.iter().any(|f| f.name() == filter.name()) {
            tracing::warn!(filter = %filter.name(), "Config filter already registered, ignoring");
            return self;
        }
        self.filters.push(filter);
        self.filters.sort_by_key(|f| f.order());
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn do_request_filter(&self, request: &mut ConfigRequest) -> Result<(), ConfigError> {
        for filter in &self.filters {
            filter.filter_request(request)?;
        }
        Ok(())
    }

    pub fn do_response_filter(&self, response: &mut ConfigResponse) -> Result<(), ConfigError> {
        for filter in &self.filters {
            filter.filter_response(response)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConfigFilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}
