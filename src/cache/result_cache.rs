//! 短 TTL 查询结果缓存
//!
//! - 命中时返回值的深拷贝
//! - 未命中时同键并发请求合并为一次计算（moka `try_get_with`）
//! - 容量满时按 LRU 淘汰；条目 TTL 很短，淘汰顺序接近最旧优先
//! - 品牌级失效：先递增代数，再按谓词清除旧条目；
//!   失效前已在计算中的结果会以旧代数写入，之后不会再被读到

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use tracing::{debug, warn};

use super::BrandCacheInvalidator;
use crate::config::CacheConfig;
use crate::errors::{ReportingError, Result};
use crate::metrics_core::{MetricsRecorder, NoopMetrics};

const CACHE_LAYER: &str = "query_result";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultCacheKey {
    pub tenant_id: String,
    pub brand_id: String,
    pub generation: u64,
    /// 规范化后的查询指纹
    pub fingerprint: String,
}

pub struct ResultCache<V> {
    inner: Cache<ResultCacheKey, Arc<V>>,
    generations: DashMap<(String, String), u64>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl<V> ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .support_invalidation_closures()
            .build();
        debug!(
            "ResultCache initialized with max capacity: {}, TTL: {}s",
            capacity,
            ttl.as_secs()
        );
        Self {
            inner,
            generations: DashMap::new(),
            metrics: NoopMetrics::arc(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.result_capacity,
            Duration::from_secs(config.result_ttl_secs.max(1)),
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    fn generation(&self, tenant_id: &str, brand_id: &str) -> u64 {
        self.generations
            .get(&(tenant_id.to_string(), brand_id.to_string()))
            .map(|g| *g)
            .unwrap_or(0)
    }

    /// 当前代数下的缓存键
    pub fn key(&self, tenant_id: &str, brand_id: &str, fingerprint: &str) -> ResultCacheKey {
        ResultCacheKey {
            tenant_id: tenant_id.to_string(),
            brand_id: brand_id.to_string(),
            generation: self.generation(tenant_id, brand_id),
            fingerprint: fingerprint.to_string(),
        }
    }

    pub async fn get(&self, key: &ResultCacheKey) -> Option<V> {
        self.inner.get(key).await.map(|hit| (*hit).clone())
    }

    /// 命中直接返回；未命中执行 `populate`，并发的同键调用只执行一次。失败不缓存。
    pub async fn get_or_populate<F, Fut>(&self, key: ResultCacheKey, populate: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send,
    {
        if let Some(hit) = self.get(&key).await {
            self.metrics.inc_cache_hit(CACHE_LAYER);
            return Ok(hit);
        }
        self.metrics.inc_cache_miss(CACHE_LAYER);

        let value = self
            .inner
            .try_get_with(key, async move { populate().await.map(Arc::new) })
            .await
            .map_err(|e: Arc<ReportingError>| (*e).clone())?;
        Ok((*value).clone())
    }

    /// 使某品牌的全部条目失效
    pub fn invalidate(&self, tenant_id: &str, brand_id: &str) {
        *self
            .generations
            .entry((tenant_id.to_string(), brand_id.to_string()))
            .or_insert(0) += 1;

        let tenant = tenant_id.to_string();
        let brand = brand_id.to_string();
        if let Err(e) = self
            .inner
            .invalidate_entries_if(move |k, _| k.tenant_id == tenant && k.brand_id == brand)
        {
            warn!(tenant_id, brand_id, "Failed to register cache invalidation: {}", e);
        }
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

#[async_trait]
impl<V> BrandCacheInvalidator for ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn invalidate_brand(&self, tenant_id: &str, brand_id: &str, reason: &str) {
        self.invalidate(tenant_id, brand_id);
        self.metrics.inc_cache_invalidation(reason);
        debug!(tenant_id, brand_id, reason, "Result cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> ResultCache<Vec<u32>> {
        ResultCache::new(100, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_hit_returns_independent_copy() {
        let cache = cache();
        let key = cache.key("t", "b", "q1");
        let first = cache
            .get_or_populate(key.clone(), || async { Ok(vec![1, 2, 3]) })
            .await
            .unwrap();
        let mut copy = cache.get(&key).await.unwrap();
        copy.push(4);
        assert_eq!(cache.get(&key).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let key = cache.key("t", "b", "same");
                cache
                    .get_or_populate(key, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(vec![7])
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), vec![7]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = cache();
        let key = cache.key("t", "b", "q");
        let err = cache
            .get_or_populate(key.clone(), || async {
                Err(ReportingError::internal("boom"))
            })
            .await;
        assert!(err.is_err());
        let ok = cache
            .get_or_populate(key, || async { Ok(vec![1]) })
            .await
            .unwrap();
        assert_eq!(ok, vec![1]);
    }

    #[tokio::test]
    async fn test_invalidate_is_scoped_to_brand() {
        let cache = cache();
        let a = cache.key("t", "a", "q");
        let b = cache.key("t", "b", "q");
        cache.get_or_populate(a.clone(), || async { Ok(vec![1]) }).await.unwrap();
        cache.get_or_populate(b.clone(), || async { Ok(vec![2]) }).await.unwrap();

        cache.invalidate_brand("t", "a", "test").await;

        assert_ne!(cache.key("t", "a", "q"), a);
        assert_eq!(cache.key("t", "b", "q"), b);
        assert!(cache.get(&cache.key("t", "a", "q")).await.is_none());
        assert_eq!(cache.get(&b).await, Some(vec![2]));
    }
}
