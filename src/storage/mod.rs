use std::sync::Arc;

use crate::errors::Result;

pub mod backend;
pub mod models;

pub use backend::{BackendKind, BrandLockGuard, SeaOrmStorage, StorageOptions};
pub use models::{
    ActiveAccount, BindingRecord, BindingStatus, FactInput, FactKey, FactScope, Ga4Defaults,
    Ga4Settings, Ga4SettingsPatch, Platform, WriteOutcome,
};

pub struct StorageFactory;

impl StorageFactory {
    /// 使用全局配置创建存储（URL 自动推断数据库类型）
    pub async fn create() -> Result<Arc<SeaOrmStorage>> {
        let config = crate::config::get_config();
        let options = StorageOptions::from_config(&config);
        let storage = SeaOrmStorage::connect(&config.database.database_url, options).await?;
        Ok(Arc::new(storage))
    }
}
