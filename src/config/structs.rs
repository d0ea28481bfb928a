use serde::{Deserialize, Serialize};

/// 静态配置（从 TOML 加载，启动时使用）
///
/// 包含：
/// - database: 数据库连接与重试
/// - cache: 查询结果缓存、物化请求合并
/// - query: 查询引擎并发与分页
/// - sync: 物化写入、范围应用与后台同步
/// - logging: 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StaticConfig {
    /// 从 TOML 文件和环境变量加载配置
    ///
    /// 优先级：ENV > config.toml > 默认值
    /// ENV 前缀：BP，分隔符：__
    /// 示例：BP__QUERY__SYNC_TIMEOUT_MS=4000
    pub fn load() -> Self {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: &str) -> Self {
        use config::{Config, Environment, File};

        let builder = Config::builder()
            // 1. 从 TOML 文件加载（可选）
            .add_source(File::with_name(path).required(false))
            // 2. 从环境变量覆盖，前缀 BP，分隔符 __
            .add_source(
                Environment::with_prefix("BP")
                    .separator("__")
                    .try_parsing(true),
            );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<StaticConfig>() {
                Ok(config) => {
                    if std::path::Path::new(path).exists() {
                        eprintln!("[INFO] Configuration loaded from: {}", path);
                    }
                    config
                }
                Err(e) => {
                    eprintln!("[ERROR] Failed to deserialize config: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[ERROR] Failed to build config: {}", e);
                Self::default()
            }
        }
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        let sample_config = Self::default();
        toml::to_string_pretty(&sample_config)
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// 数据库连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_database_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_database_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 查询结果缓存 TTL（秒）
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
    /// 查询结果缓存最大条目数
    #[serde(default = "default_result_capacity")]
    pub result_capacity: u64,
    /// 相同物化请求合并窗口（秒）
    #[serde(default = "default_materialize_coalesce_ttl_secs")]
    pub materialize_coalesce_ttl_secs: u64,
    #[serde(default = "default_materialize_coalesce_capacity")]
    pub materialize_coalesce_capacity: u64,
}

/// 查询引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// 每个 (tenant, brand) 同时执行的聚合查询上限
    #[serde(default = "default_per_brand_concurrency")]
    pub per_brand_concurrency: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
    /// 查询触发物化的硬超时（毫秒）
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
}

/// 物化与同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
    #[serde(default = "default_scope_apply_parallelism")]
    pub scope_apply_parallelism: usize,
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_lead_event_names")]
    pub lead_event_names: Vec<String>,
    #[serde(default)]
    pub conversion_event_names: Vec<String>,
    /// 品牌锁等待上限（毫秒）
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_file")]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

// ============================================================
// Default value functions for static config
// ============================================================

fn default_database_url() -> String {
    "sqlite://brandpulse.db?mode=rwc".to_string()
}

fn default_database_pool_size() -> u32 {
    10
}

fn default_database_timeout() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_result_ttl_secs() -> u64 {
    60
}

fn default_result_capacity() -> u64 {
    5000
}

fn default_materialize_coalesce_ttl_secs() -> u64 {
    30
}

fn default_materialize_coalesce_capacity() -> u64 {
    1000
}

fn default_per_brand_concurrency() -> usize {
    4
}

fn default_page_size() -> u64 {
    100
}

fn default_max_page_size() -> u64 {
    1000
}

fn default_sync_timeout_ms() -> u64 {
    8000
}

fn default_insert_batch_size() -> usize {
    500
}

fn default_scope_apply_parallelism() -> usize {
    4
}

fn default_backfill_days() -> u32 {
    30
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_lead_event_names() -> Vec<String> {
    vec!["generate_lead".to_string()]
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_file() -> Option<String> {
    None
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

// ============================================================
// Default implementations
// ============================================================

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pool_size: default_database_pool_size(),
            timeout: default_database_timeout(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            result_ttl_secs: default_result_ttl_secs(),
            result_capacity: default_result_capacity(),
            materialize_coalesce_ttl_secs: default_materialize_coalesce_ttl_secs(),
            materialize_coalesce_capacity: default_materialize_coalesce_capacity(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            per_brand_concurrency: default_per_brand_concurrency(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            sync_timeout_ms: default_sync_timeout_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            insert_batch_size: default_insert_batch_size(),
            scope_apply_parallelism: default_scope_apply_parallelism(),
            backfill_days: default_backfill_days(),
            default_timezone: default_timezone(),
            lead_event_names: default_lead_event_names(),
            conversion_event_names: Vec::new(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: default_log_file(),
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_roundtrips_defaults() {
        let sample = StaticConfig::generate_sample_config();
        assert!(sample.contains("[database]"));
        assert!(sample.contains("[sync]"));

        let parsed: StaticConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.query.per_brand_concurrency, 4);
        assert_eq!(parsed.sync.insert_batch_size, 500);
        assert_eq!(parsed.sync.lead_event_names, vec!["generate_lead"]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: StaticConfig = toml::from_str(
            r#"
            [query]
            sync_timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(parsed.query.sync_timeout_ms, 1500);
        assert_eq!(parsed.query.max_page_size, 1000);
        assert_eq!(parsed.cache.result_ttl_secs, 60);
    }
}
