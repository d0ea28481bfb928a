//! 按 (tenant, brand) 限制同时执行的重查询数量
//!
//! 每个品牌一个固定宽度的信号量，等待者按 FIFO 顺序获得许可。
//! 没有持有者和等待者时条目会被移除。

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;

use crate::errors::{ReportingError, Result};

pub struct ConcurrencyGate {
    width: usize,
    gates: DashMap<(String, String), Arc<Semaphore>>,
}

impl ConcurrencyGate {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            gates: DashMap::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn semaphore(&self, key: &(String, String)) -> Arc<Semaphore> {
        self.gates
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.width)))
            .clone()
    }

    /// 在品牌许可内执行 `fut`
    pub async fn run<T, Fut>(&self, tenant_id: &str, brand_id: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let key = (tenant_id.to_string(), brand_id.to_string());
        let semaphore = self.semaphore(&key);
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ReportingError::internal("Concurrency gate closed"))?;

        let outcome = fut.await;

        drop(permit);
        drop(semaphore);
        self.gates.remove_if(&key, |_, s| Arc::strong_count(s) == 1);
        outcome
    }

    /// 当前被占用的许可数
    pub fn in_flight(&self, tenant_id: &str, brand_id: &str) -> usize {
        self.gates
            .get(&(tenant_id.to_string(), brand_id.to_string()))
            .map(|s| self.width - s.available_permits())
            .unwrap_or(0)
    }

    pub fn tracked_brands(&self) -> usize {
        self.gates.len()
    }
}
