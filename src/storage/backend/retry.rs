//! 数据库瞬时故障重试
//!
//! 只用于事务之外的单条读写；事务内的语句失败由调用方整体回滚。

use sea_orm::DbErr;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::DatabaseConfig;

/// 错误对应的重试原因；`None` 表示不可重试
pub fn retry_reason(err: &DbErr) -> Option<&'static str> {
    match err {
        DbErr::ConnectionAcquire(_) => Some("pool_acquire"),
        DbErr::Conn(_) => Some("connection"),
        DbErr::Exec(runtime_err) | DbErr::Query(runtime_err) => runtime_reason(runtime_err),
        _ => None,
    }
}

pub fn is_retryable_error(err: &DbErr) -> bool {
    retry_reason(err).is_some()
}

fn runtime_reason(err: &sea_orm::error::RuntimeErr) -> Option<&'static str> {
    use sea_orm::error::RuntimeErr;

    match err {
        RuntimeErr::SqlxError(sqlx_err) => {
            use std::ops::Deref;
            if let Some(db_err) = sqlx_err.deref().as_database_error()
                && let Some(code) = db_err.code()
            {
                return match code.as_ref() {
                    // MySQL 死锁 / 锁等待超时
                    "1213" | "1205" => Some("lock_conflict"),
                    // PostgreSQL 序列化失败 / 死锁
                    "40001" | "40P01" => Some("lock_conflict"),
                    // SQLite BUSY / LOCKED
                    "5" | "6" => Some("busy"),
                    _ => None,
                };
            }
            message_reason(&sqlx_err.to_string().to_lowercase())
        }
        RuntimeErr::Internal(msg) => message_reason(&msg.to_lowercase()),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// 通过错误消息识别（驱动未给出错误码时的回退）
fn message_reason(err_str: &str) -> Option<&'static str> {
    if err_str.contains("deadlock")
        || err_str.contains("lock wait timeout")
        || err_str.contains("serialization failure")
    {
        Some("lock_conflict")
    } else if err_str.contains("database is locked") {
        Some("busy")
    } else {
        None
    }
}

/// 重试配置
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl From<&DatabaseConfig> for RetryConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_retries: config.retry_count,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }
}

impl RetryConfig {
    /// 第 `attempt` 次重试前的等待时间（指数退避，0-25% 抖动）
    pub fn backoff(&self, attempt: u32) -> Duration {
        use rand::RngExt;
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay_ms);
        let jitter = rand::rng().random_range(0..=capped / 4);
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

/// 对可重试错误按指数退避重试
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
) -> Result<T, DbErr>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbErr>>,
{
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempt, "Database operation recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        match retry_reason(&err) {
            Some(reason) if attempt < config.max_retries => {
                attempt += 1;
                let delay = config.backoff(attempt);
                warn!(
                    operation = operation_name,
                    reason,
                    attempt,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient database error, retrying: {}",
                    err
                );
                sleep(delay).await;
            }
            _ => return Err(err),
        }
    }
}
