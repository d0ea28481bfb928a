//! 查询结果缓存与按品牌的并发闸门

pub mod concurrency_gate;
pub mod result_cache;

use async_trait::async_trait;

pub use concurrency_gate::ConcurrencyGate;
pub use result_cache::{ResultCache, ResultCacheKey};

/// 品牌数据发生写入后的缓存失效钩子
///
/// 绑定切换、物化写入、设置变更都会调用它。
#[async_trait]
pub trait BrandCacheInvalidator: Send + Sync {
    async fn invalidate_brand(&self, tenant_id: &str, brand_id: &str, reason: &str);
}

/// 不缓存时使用的空实现
pub struct NoopInvalidator;

#[async_trait]
impl BrandCacheInvalidator for NoopInvalidator {
    async fn invalidate_brand(&self, tenant_id: &str, brand_id: &str, reason: &str) {
        tracing::trace!(tenant_id, brand_id, reason, "Cache invalidation ignored");
    }
}
