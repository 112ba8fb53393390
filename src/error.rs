use std::io;
use thiserror::Error;
use tracing::error;

/// Unified error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("no database connection available")]
    NoConnection,

    #[error("database context is not ready")]
    NotReady,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque failure surfaced by a storage driver.
///
/// `sql` holds the native statement when the driver knows it, `parent` the
/// message of the underlying database error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
    pub sql: Option<String>,
    pub parent: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql: None,
            parent: None,
        }
    }

    /// Error carrying the statement that caused it
    pub fn with_sql(
        message: impl Into<String>,
        sql: impl Into<String>,
        parent: Option<String>,
    ) -> Self {
        Self {
            message: message.into(),
            sql: Some(sql.into()),
            parent,
        }
    }

    pub fn has_sql_diagnostic(&self) -> bool {
        self.sql.is_some()
    }

    /// Log the error, keeping the originating statement apart from the message.
    pub fn log(&self) {
        match &self.sql {
            Some(sql) => error!(
                "{}\ncaused {}",
                sql,
                self.parent.as_deref().unwrap_or(&self.message)
            ),
            None => error!("{}", self.message),
        }
    }
}

/// Result type for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Error category for configuration issues
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_diagnostic_shape() {
        let plain = DriverError::new("connection reset");
        assert!(!plain.has_sql_diagnostic());
        assert_eq!(plain.to_string(), "connection reset");

        let with_sql = DriverError::with_sql(
            "constraint violation",
            "INSERT INTO \"users\" (\"email\") VALUES (?)",
            Some("UNIQUE constraint failed: users.email".to_string()),
        );
        assert!(with_sql.has_sql_diagnostic());
        assert_eq!(
            with_sql.sql.as_deref(),
            Some("INSERT INTO \"users\" (\"email\") VALUES (?)")
        );
    }

    #[test]
    fn test_driver_error_converts_into_error() {
        let err: Error = DriverError::new("boom").into();
        assert!(matches!(err, Error::Driver(ref e) if e.message == "boom"));
        assert_eq!(err.to_string(), "driver error: boom");
    }
}
