//! SeaORM storage backend
//!
//! Fact store, platform bindings and GA4 settings on SQLite, MySQL/MariaDB
//! or PostgreSQL.

mod advisory_lock;
pub mod aggregate;
pub(crate) mod bindings;
mod connection;
pub(crate) mod facts;
pub mod retry;
pub(crate) mod settings;

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{DatabaseConnection, DbBackend};
use tracing::info;

use crate::config::StaticConfig;
use crate::errors::{ReportingError, Result};
use crate::metrics_core::{MetricsRecorder, NoopMetrics};

pub use advisory_lock::{BrandLockGuard, brand_lock_key};
pub use aggregate::{
    AggregateOutput, AggregateRow, AggregateSpec, BaseColumn, DimensionColumn, PlatformScope,
    SortKey, SortTarget,
};
pub use connection::{connect_generic, connect_sqlite, run_migrations};

use advisory_lock::BrandLocks;

/// 数据库类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Mysql,
    Postgres,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Mysql => "mysql",
            BackendKind::Postgres => "postgres",
        }
    }

    pub fn db_backend(&self) -> DbBackend {
        match self {
            BackendKind::Sqlite => DbBackend::Sqlite,
            BackendKind::Mysql => DbBackend::MySql,
            BackendKind::Postgres => DbBackend::Postgres,
        }
    }
}

/// 从数据库 URL 推断数据库类型
pub fn infer_backend_from_url(database_url: &str) -> Result<BackendKind> {
    if database_url.starts_with("sqlite:")
        || database_url.ends_with(".db")
        || database_url.ends_with(".sqlite")
    {
        Ok(BackendKind::Sqlite)
    } else if database_url.starts_with("mysql://") || database_url.starts_with("mariadb://") {
        Ok(BackendKind::Mysql)
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Ok(BackendKind::Postgres)
    } else {
        Err(ReportingError::database_config(format!(
            "无法从 URL 推断数据库类型: {}. 支持的 URL 格式: sqlite://, mysql://, mariadb://, postgres://",
            database_url
        )))
    }
}

/// 存储层选项
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub pool_size: u32,
    pub connect_timeout: Duration,
    pub retry: retry::RetryConfig,
    /// 品牌锁等待上限
    pub lock_timeout: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            pool_size: 10,
            connect_timeout: Duration::from_secs(8),
            retry: retry::RetryConfig::default(),
            lock_timeout: Duration::from_secs(10),
        }
    }
}

impl StorageOptions {
    pub fn from_config(config: &StaticConfig) -> Self {
        Self {
            pool_size: config.database.pool_size,
            connect_timeout: Duration::from_secs(config.database.timeout.max(1)),
            retry: retry::RetryConfig::from(&config.database),
            lock_timeout: Duration::from_millis(config.sync.lock_timeout_ms.max(1)),
        }
    }
}

/// SeaORM-based storage backend
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
    backend: BackendKind,
    options: StorageOptions,
    locks: Arc<BrandLocks>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl SeaOrmStorage {
    /// 连接数据库并运行迁移
    pub async fn connect(database_url: &str, options: StorageOptions) -> Result<Self> {
        if database_url.is_empty() {
            return Err(ReportingError::database_config("DATABASE_URL 未设置"));
        }

        let backend = infer_backend_from_url(database_url)?;
        let db = match backend {
            BackendKind::Sqlite => connect_sqlite(database_url).await?,
            _ => connect_generic(database_url, backend.as_str(), &options).await?,
        };

        run_migrations(&db).await?;

        info!("{} storage initialized", backend.as_str().to_uppercase());
        Ok(Self {
            db,
            backend,
            options,
            locks: Arc::new(BrandLocks::default()),
            metrics: NoopMetrics::arc(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// 获取数据库连接
    pub fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    fn retry_config(&self) -> retry::RetryConfig {
        self.options.retry
    }
}
