//! 以 (tenant, brand) 为键、事务作用域的品牌互斥锁
//!
//! - PostgreSQL: `pg_advisory_xact_lock`，提交/回滚时自动释放
//! - MySQL: `GET_LOCK` / `RELEASE_LOCK`，在提交/回滚前释放
//! - SQLite: 写入本身是库级串行的，用一把进程内异步锁代替
//!
//! 所有后端都额外持有进程内的按键互斥锁，避免同一进程对同一品牌发起并发的数据库锁等待。
//! 持锁期间不可再次调用会加锁的公开方法（不可重入）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use sea_orm::{ConnectionTrait, DatabaseTransaction, Statement, TransactionTrait};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{BackendKind, SeaOrmStorage};
use crate::errors::{ReportingError, Result};

/// 稳定的 64 位锁键（PostgreSQL advisory lock 使用有符号值）
pub fn brand_lock_key(tenant_id: &str, brand_id: &str) -> i64 {
    let name = format!("{}:{}", tenant_id, brand_id);
    xxhash_rust::xxh64::xxh64(name.as_bytes(), 0) as i64
}

fn mysql_lock_name(key: i64) -> String {
    // MySQL 锁名最长 64 字符
    format!("brandpulse:{:016x}", key as u64)
}

#[derive(Default)]
pub(super) struct BrandLocks {
    local: DashMap<String, Arc<Mutex<()>>>,
    database_wide: Arc<Mutex<()>>,
}

impl BrandLocks {
    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.local
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// 进程内按键锁；释放后若无人等待则从表中移除
struct LocalSlot {
    key: String,
    locks: Arc<BrandLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LocalSlot {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .local
            .remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
    }
}

/// 持有中的品牌锁及其事务
///
/// 必须以 `commit` 或 `rollback` 结束；直接 drop 会回滚事务，但 MySQL 命名锁要等连接回收才释放。
pub struct BrandLockGuard {
    txn: DatabaseTransaction,
    mysql_lock: Option<String>,
    _slot: LocalSlot,
    _database_wide: Option<OwnedMutexGuard<()>>,
}

impl BrandLockGuard {
    pub fn txn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<()> {
        let BrandLockGuard {
            txn,
            mysql_lock,
            _slot,
            _database_wide,
        } = self;
        if let Some(name) = mysql_lock {
            release_mysql_lock(&txn, &name).await;
        }
        txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        let BrandLockGuard {
            txn,
            mysql_lock,
            _slot,
            _database_wide,
        } = self;
        if let Some(name) = mysql_lock {
            release_mysql_lock(&txn, &name).await;
        }
        txn.rollback().await?;
        Ok(())
    }
}

async fn release_mysql_lock(txn: &DatabaseTransaction, name: &str) {
    let stmt = Statement::from_sql_and_values(
        sea_orm::DbBackend::MySql,
        "SELECT RELEASE_LOCK(?)",
        [name.into()],
    );
    if let Err(e) = txn.query_one_raw(stmt).await {
        warn!(lock = %name, "Failed to release MySQL named lock: {}", e);
    }
}

impl SeaOrmStorage {
    /// 获取品牌锁并开启事务
    pub async fn lock_brand(&self, tenant_id: &str, brand_id: &str) -> Result<BrandLockGuard> {
        let started = Instant::now();
        let deadline = self.options.lock_timeout;
        let name = format!("{}:{}", tenant_id, brand_id);

        let in_process = async {
            let guard = self.locks.slot(&name).lock_owned().await;
            let database_wide = match self.backend {
                BackendKind::Sqlite => Some(self.locks.database_wide.clone().lock_owned().await),
                _ => None,
            };
            (guard, database_wide)
        };
        let (guard, database_wide) = tokio::time::timeout(deadline, in_process)
            .await
            .map_err(|_| {
                ReportingError::lock_acquisition(format!(
                    "Timed out after {}ms waiting for brand lock {}",
                    deadline.as_millis(),
                    name
                ))
            })?;
        let slot = LocalSlot {
            key: name.clone(),
            locks: self.locks.clone(),
            guard: Some(guard),
        };

        let txn = self.db.begin().await.map_err(|e| {
            ReportingError::lock_acquisition(format!("Failed to open transaction: {}", e))
        })?;

        let remaining = deadline.saturating_sub(started.elapsed());
        let key = brand_lock_key(tenant_id, brand_id);
        let mysql_lock = match self.backend {
            BackendKind::Postgres => {
                acquire_postgres(&txn, key, remaining).await?;
                None
            }
            BackendKind::Mysql => Some(acquire_mysql(&txn, key, remaining).await?),
            BackendKind::Sqlite => None,
        };

        let waited = started.elapsed();
        self.metrics
            .observe_lock_wait(self.backend.as_str(), waited.as_secs_f64());
        debug!(
            tenant_id,
            brand_id,
            waited_ms = waited.as_millis() as u64,
            "Brand lock acquired"
        );

        Ok(BrandLockGuard {
            txn,
            mysql_lock,
            _slot: slot,
            _database_wide: database_wide,
        })
    }

    /// 在品牌锁保护的事务中执行 `op`：成功提交，失败回滚
    pub async fn with_brand_lock<T, F>(&self, tenant_id: &str, brand_id: &str, op: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T>> + Send,
    {
        let guard = self.lock_brand(tenant_id, brand_id).await?;
        let outcome = op(guard.txn()).await;
        match outcome {
            Ok(value) => {
                guard.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = guard.rollback().await {
                    warn!(tenant_id, brand_id, "Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

async fn acquire_postgres(txn: &DatabaseTransaction, key: i64, remaining: Duration) -> Result<()> {
    let timeout_ms = remaining.as_millis().max(1);
    // SET 不支持绑定参数；值是本地计算的整数
    txn.execute_unprepared(&format!("SET LOCAL lock_timeout = {}", timeout_ms))
        .await
        .map_err(|e| ReportingError::lock_acquisition(format!("SET lock_timeout failed: {}", e)))?;

    let stmt = Statement::from_sql_and_values(
        sea_orm::DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock($1)",
        [key.into()],
    );
    txn.query_one_raw(stmt).await.map_err(|e| {
        ReportingError::lock_acquisition(format!("pg_advisory_xact_lock failed: {}", e))
    })?;
    Ok(())
}

async fn acquire_mysql(txn: &DatabaseTransaction, key: i64, remaining: Duration) -> Result<String> {
    let name = mysql_lock_name(key);
    let timeout_secs = remaining.as_secs_f64().ceil().max(1.0) as i64;
    let stmt = Statement::from_sql_and_values(
        sea_orm::DbBackend::MySql,
        "SELECT GET_LOCK(?, ?) AS acquired",
        [name.clone().into(), timeout_secs.into()],
    );
    let row = txn
        .query_one_raw(stmt)
        .await
        .map_err(|e| ReportingError::lock_acquisition(format!("GET_LOCK failed: {}", e)))?;
    let acquired: Option<i64> = match row {
        Some(row) => row.try_get("", "acquired")?,
        None => None,
    };
    if acquired == Some(1) {
        Ok(name)
    } else {
        Err(ReportingError::lock_acquisition(format!(
            "GET_LOCK({}) timed out after {}s",
            name, timeout_secs
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable_and_scoped() {
        let a = brand_lock_key("t1", "b1");
        assert_eq!(a, brand_lock_key("t1", "b1"));
        assert_ne!(a, brand_lock_key("t1", "b2"));
        assert_ne!(a, brand_lock_key("t2", "b1"));
        assert_ne!(brand_lock_key("t1", "b1"), brand_lock_key("t1b", "1"));
    }

    #[test]
    fn test_mysql_lock_name_fits_limit() {
        let name = mysql_lock_name(brand_lock_key("tenant", "brand"));
        assert!(name.len() <= 64);
        assert!(name.starts_with("brandpulse:"));
    }

    #[tokio::test]
    async fn test_local_slots_are_pruned_after_release() {
        let locks = Arc::new(BrandLocks::default());
        {
            let guard = locks.slot("t:b").lock_owned().await;
            let _slot = LocalSlot {
                key: "t:b".to_string(),
                locks: locks.clone(),
                guard: Some(guard),
            };
            assert_eq!(locks.local.len(), 1);
        }
        assert!(locks.local.is_empty());
    }
}
