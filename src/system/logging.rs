//! Logging system initialization
//!
//! Installs the global tracing subscriber according to `[logging]`.

use crate::config::LoggingConfig;
use tracing_appender::rolling;

/// Initialize logging system based on configuration
///
/// **Note**: call once during start-up, after the configuration is loaded.
///
/// # Returns
/// * `WorkerGuard` - must be kept alive for the duration of the program
///   so non-blocking log writes are flushed
///
/// # Errors
/// * If the log file or the rolling appender cannot be created
pub fn init_logging(
    config: &LoggingConfig,
) -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
    let writer: Box<dyn std::io::Write + Send + Sync> = match config.file.as_deref() {
        Some(log_file) if !log_file.is_empty() && config.enable_rotation => {
            // 按天滚动
            let path = std::path::Path::new(log_file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(std::path::Path::new("."));
            let filename = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("brandpulse.log");
            let appender = rolling::Builder::new()
                .rotation(rolling::Rotation::DAILY)
                .filename_prefix(filename.trim_end_matches(".log"))
                .filename_suffix("log")
                .max_log_files(config.max_backups.max(1) as usize)
                .build(dir)
                .map_err(std::io::Error::other)?;
            Box::new(appender)
        }
        Some(log_file) if !log_file.is_empty() => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)?;
            Box::new(file)
        }
        _ => Box::new(std::io::stdout()),
    };

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(writer);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.clone()));

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_env_filter(filter)
        .with_level(true)
        .with_ansi(config.file.as_ref().is_none_or(|f| f.is_empty()));

    let installed = if config.format == "json" {
        subscriber_builder.json().try_init()
    } else {
        subscriber_builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("[WARN] Global tracing subscriber already set: {}", e);
    }

    Ok(guard)
}
