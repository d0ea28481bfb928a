pub mod brand_ga4_settings;
pub mod brand_platform_binding;
pub mod fact_sync_coverage;
pub mod marketing_fact_daily;

pub use brand_ga4_settings::Entity as BrandGa4SettingsEntity;
pub use brand_platform_binding::Entity as BrandPlatformBindingEntity;
pub use fact_sync_coverage::Entity as FactSyncCoverageEntity;
pub use marketing_fact_daily::Entity as MarketingFactDailyEntity;
