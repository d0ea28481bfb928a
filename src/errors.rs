use std::fmt;

use crate::storage::models::Platform;

#[derive(Debug, Clone)]
pub enum ReportingError {
    DatabaseConfig(String),
    DatabaseConnection(String),
    DatabaseOperation(String),
    LockAcquisition(String),
    Validation(String),
    NotFound(String),
    MissingConnections(Vec<Platform>),
    Upstream(String),
    SchemaDrift(String),
    StaleBinding(String),
    Timeout(String),
    Serialization(String),
    DateParse(String),
    Internal(String),
}

impl ReportingError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            ReportingError::DatabaseConfig(_) => "E001",
            ReportingError::DatabaseConnection(_) => "E002",
            ReportingError::DatabaseOperation(_) => "E003",
            ReportingError::LockAcquisition(_) => "E004",
            ReportingError::Validation(_) => "E005",
            ReportingError::NotFound(_) => "E006",
            ReportingError::MissingConnections(_) => "E007",
            ReportingError::Upstream(_) => "E008",
            ReportingError::SchemaDrift(_) => "E009",
            ReportingError::StaleBinding(_) => "E010",
            ReportingError::Timeout(_) => "E011",
            ReportingError::Serialization(_) => "E012",
            ReportingError::DateParse(_) => "E013",
            ReportingError::Internal(_) => "E014",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            ReportingError::DatabaseConfig(_) => "Database Configuration Error",
            ReportingError::DatabaseConnection(_) => "Database Connection Error",
            ReportingError::DatabaseOperation(_) => "Database Operation Error",
            ReportingError::LockAcquisition(_) => "Lock Acquisition Error",
            ReportingError::Validation(_) => "Validation Error",
            ReportingError::NotFound(_) => "Resource Not Found",
            ReportingError::MissingConnections(_) => "Missing Connections",
            ReportingError::Upstream(_) => "Upstream Error",
            ReportingError::SchemaDrift(_) => "Upstream Schema Drift",
            ReportingError::StaleBinding(_) => "Stale Binding",
            ReportingError::Timeout(_) => "Timeout",
            ReportingError::Serialization(_) => "Serialization Error",
            ReportingError::DateParse(_) => "Date Parse Error",
            ReportingError::Internal(_) => "Internal Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> String {
        match self {
            ReportingError::MissingConnections(platforms) => {
                let names: Vec<&str> = platforms.iter().map(|p| p.as_str()).collect();
                format!("No active connection for platform(s): {}", names.join(", "))
            }
            ReportingError::DatabaseConfig(msg)
            | ReportingError::DatabaseConnection(msg)
            | ReportingError::DatabaseOperation(msg)
            | ReportingError::LockAcquisition(msg)
            | ReportingError::Validation(msg)
            | ReportingError::NotFound(msg)
            | ReportingError::Upstream(msg)
            | ReportingError::SchemaDrift(msg)
            | ReportingError::StaleBinding(msg)
            | ReportingError::Timeout(msg)
            | ReportingError::Serialization(msg)
            | ReportingError::DateParse(msg)
            | ReportingError::Internal(msg) => msg.clone(),
        }
    }

    /// REST 层使用的 HTTP 状态码
    pub fn http_status(&self) -> u16 {
        match self {
            ReportingError::Validation(_) | ReportingError::DateParse(_) => 400,
            ReportingError::NotFound(_) => 404,
            ReportingError::MissingConnections(_) | ReportingError::StaleBinding(_) => 409,
            _ => 500,
        }
    }

    /// 缺失连接的平台列表（仅 MissingConnections 有值）
    pub fn missing_platforms(&self) -> Option<&[Platform]> {
        match self {
            ReportingError::MissingConnections(platforms) => Some(platforms),
            _ => None,
        }
    }

    /// 格式化为彩色输出（用于 CLI）
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for ReportingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for ReportingError {}

// 便捷的构造函数
impl ReportingError {
    pub fn database_config<T: Into<String>>(msg: T) -> Self {
        ReportingError::DatabaseConfig(msg.into())
    }

    pub fn database_connection<T: Into<String>>(msg: T) -> Self {
        ReportingError::DatabaseConnection(msg.into())
    }

    pub fn database_operation<T: Into<String>>(msg: T) -> Self {
        ReportingError::DatabaseOperation(msg.into())
    }

    pub fn lock_acquisition<T: Into<String>>(msg: T) -> Self {
        ReportingError::LockAcquisition(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        ReportingError::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        ReportingError::NotFound(msg.into())
    }

    pub fn missing_connections(mut platforms: Vec<Platform>) -> Self {
        platforms.sort();
        platforms.dedup();
        ReportingError::MissingConnections(platforms)
    }

    pub fn upstream<T: Into<String>>(msg: T) -> Self {
        ReportingError::Upstream(msg.into())
    }

    pub fn schema_drift<T: Into<String>>(msg: T) -> Self {
        ReportingError::SchemaDrift(msg.into())
    }

    pub fn stale_binding<T: Into<String>>(msg: T) -> Self {
        ReportingError::StaleBinding(msg.into())
    }

    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        ReportingError::Timeout(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ReportingError::Serialization(msg.into())
    }

    pub fn date_parse<T: Into<String>>(msg: T) -> Self {
        ReportingError::DateParse(msg.into())
    }

    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ReportingError::Internal(msg.into())
    }
}

impl From<sea_orm::DbErr> for ReportingError {
    fn from(err: sea_orm::DbErr) -> Self {
        ReportingError::DatabaseOperation(err.to_string())
    }
}

impl From<std::io::Error> for ReportingError {
    fn from(err: std::io::Error) -> Self {
        ReportingError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ReportingError {
    fn from(err: serde_json::Error) -> Self {
        ReportingError::Serialization(err.to_string())
    }
}

impl From<chrono::ParseError> for ReportingError {
    fn from(err: chrono::ParseError) -> Self {
        ReportingError::DateParse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReportingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ReportingError::validation("bad metric").http_status(), 400);
        assert_eq!(ReportingError::not_found("brand").http_status(), 404);
        assert_eq!(
            ReportingError::missing_connections(vec![Platform::Meta]).http_status(),
            409
        );
        assert_eq!(ReportingError::database_operation("boom").http_status(), 500);
        assert_eq!(ReportingError::lock_acquisition("timeout").http_status(), 500);
    }

    #[test]
    fn test_missing_connections_sorted_and_named() {
        let err = ReportingError::missing_connections(vec![
            Platform::Tiktok,
            Platform::Meta,
            Platform::Tiktok,
        ]);
        assert_eq!(
            err.missing_platforms(),
            Some(&[Platform::Meta, Platform::Tiktok][..])
        );
        assert_eq!(
            err.message(),
            "No active connection for platform(s): meta, tiktok"
        );
        assert_eq!(err.code(), "E007");
    }

    #[test]
    fn test_from_db_err() {
        let err: ReportingError = sea_orm::DbErr::Custom("nope".to_string()).into();
        assert!(matches!(err, ReportingError::DatabaseOperation(_)));
    }
}
