use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;

use super::StaticConfig;

static CONFIG: OnceLock<ArcSwap<StaticConfig>> = OnceLock::new();

fn slot() -> &'static ArcSwap<StaticConfig> {
    CONFIG.get_or_init(|| ArcSwap::from_pointee(StaticConfig::default()))
}

/// Current global configuration
///
/// Lock-free; library callers that never load a file see the defaults.
pub fn get_config() -> Arc<StaticConfig> {
    slot().load_full()
}

/// Load `path` (or `config.toml`) plus `BP__*` overrides and install it
///
/// # Examples
/// ```no_run
/// use brandpulse::config::load_config;
/// load_config(Some("/etc/brandpulse/config.toml"));
/// ```
pub fn load_config(path: Option<&str>) -> Arc<StaticConfig> {
    let config = match path {
        Some(path) => StaticConfig::load_from(path),
        None => StaticConfig::load(),
    };
    set_config(config);
    get_config()
}

/// Replace the global configuration
pub fn set_config(config: StaticConfig) {
    slot().store(Arc::new(config));
}
