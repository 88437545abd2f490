//! Error types for the multi-database MCP server.
//!
//! Every failure that can reach a caller is a [`DbError`]. Variants carry the
//! logical database name where one is involved and map onto a stable
//! [`ErrorCategory`] so clients can tell "not configured" from "query failed"
//! from "unreachable" without parsing messages. Driver errors are translated
//! here and never surface raw.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ConfigError,
    NotFound,
    ConnectionError,
    PoolExhausted,
    QueryExecutionError,
    Timeout,
    Cancelled,
    InvalidInput,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigError => "config_error",
            Self::NotFound => "not_found",
            Self::ConnectionError => "connection_error",
            Self::PoolExhausted => "pool_exhausted",
            Self::QueryExecutionError => "query_execution_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidInput => "invalid_input",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
pub enum DbError {
    /// Invalid configuration. Fatal at startup, never produced per request.
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database '{database}' is not configured")]
    DatabaseNotFound {
        database: String,
        available: Vec<String>,
    },

    #[error("Table '{table}' not found in database '{database}'")]
    TableNotFound {
        database: String,
        table: String,
        schema: Option<String>,
    },

    #[error("Connection to '{database}' failed: {message}")]
    Connection {
        database: String,
        message: String,
        suggestion: String,
    },

    #[error("No connection to '{database}' became available within {waited_secs}s")]
    PoolExhausted { database: String, waited_secs: u64 },

    #[error("Query on '{database}' failed: {message}")]
    Query {
        database: String,
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Timeout on '{database}': {operation} exceeded {elapsed_secs}s")]
    Timeout {
        database: String,
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Cancelled on '{database}': {operation}")]
    Cancelled { database: String, operation: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Unknown logical database name. `available` lists the configured names.
    pub fn database_not_found(database: impl Into<String>, available: Vec<String>) -> Self {
        Self::DatabaseNotFound {
            database: database.into(),
            available,
        }
    }

    pub fn table_not_found(
        database: impl Into<String>,
        table: impl Into<String>,
        schema: Option<String>,
    ) -> Self {
        Self::TableNotFound {
            database: database.into(),
            table: table.into(),
            schema,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(
        database: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Connection {
            database: database.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_exhausted(database: impl Into<String>, waited_secs: u64) -> Self {
        Self::PoolExhausted {
            database: database.into(),
            waited_secs,
        }
    }

    pub fn query(
        database: impl Into<String>,
        message: impl Into<String>,
        sql_state: Option<String>,
    ) -> Self {
        Self::Query {
            database: database.into(),
            message: message.into(),
            sql_state,
        }
    }

    pub fn timeout(
        database: impl Into<String>,
        operation: impl Into<String>,
        elapsed_secs: u64,
    ) -> Self {
        Self::Timeout {
            database: database.into(),
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn cancelled(database: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Cancelled {
            database: database.into(),
            operation: operation.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } => ErrorCategory::ConfigError,
            Self::DatabaseNotFound { .. } | Self::TableNotFound { .. } => ErrorCategory::NotFound,
            Self::Connection { .. } => ErrorCategory::ConnectionError,
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::Query { .. } => ErrorCategory::QueryExecutionError,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::InvalidInput { .. } => ErrorCategory::InvalidInput,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// The logical database this error originated from, if any.
    pub fn database(&self) -> Option<&str> {
        match self {
            Self::DatabaseNotFound { database, .. }
            | Self::TableNotFound { database, .. }
            | Self::Connection { database, .. }
            | Self::PoolExhausted { database, .. }
            | Self::Query { database, .. }
            | Self::Timeout { database, .. }
            | Self::Cancelled { database, .. } => Some(database),
            Self::Config { .. } | Self::InvalidInput { .. } | Self::Internal { .. } => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion.clone()),
            Self::DatabaseNotFound { available, .. } if available.is_empty() => {
                Some("No databases are configured".to_string())
            }
            Self::DatabaseNotFound { available, .. } => Some(format!(
                "Use list_databases to see configured names: {}",
                available.join(", ")
            )),
            Self::TableNotFound { schema: Some(s), .. } => Some(format!(
                "Use list_tables with schema '{}' to see available tables",
                s
            )),
            Self::TableNotFound { .. } => {
                Some("Use list_tables to see available tables".to_string())
            }
            Self::PoolExhausted { .. } => Some(
                "All connections are busy; retry later or raise max_connections".to_string(),
            ),
            Self::Query { .. } => Some("Check the SQL syntax and referenced objects".to_string()),
            Self::Timeout { .. } => Some(
                "Consider increasing the timeout or optimizing the operation".to_string(),
            ),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::PoolExhausted { .. } | Self::Timeout { .. }
        )
    }

    /// Translate a sqlx error raised while working against `database`.
    pub fn from_sqlx(database: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                database,
                msg.to_string(),
                "Check the connection parameters and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(database, db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::query(database, "No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::pool_exhausted(database, 0),
            sqlx::Error::PoolClosed => DbError::cancelled(database, "connection pool is closed"),
            sqlx::Error::Io(io_err) => DbError::connection(
                database,
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                database,
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                database,
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::connection(
                database,
                "Database worker crashed",
                "Retry the operation",
            ),
            other => DbError::internal(format!("Unexpected database error: {}", other)),
        }
    }

    /// Translate a tiberius error raised while working against `database`.
    pub fn from_tiberius(database: &str, err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TdsError;

        match err {
            TdsError::Server(token) => {
                let state = Some(token.code().to_string());
                DbError::query(database, token.message(), state)
            }
            TdsError::Io { message, .. } => DbError::connection(
                database,
                format!("I/O error: {}", message),
                "Check network connectivity and database server status",
            ),
            TdsError::Tls(msg) => DbError::connection(
                database,
                format!("TLS error: {}", msg),
                "Set trust_server_certificate or check the server certificate",
            ),
            TdsError::Protocol(msg) => DbError::connection(
                database,
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            TdsError::Routing { host, port } => DbError::connection(
                database,
                format!("Server requested redirect to {}:{}", host, port),
                "Connect to the routed host directly",
            ),
            TdsError::Conversion(msg) => {
                DbError::internal(format!("Failed to convert value: {}", msg))
            }
            other => DbError::internal(format!("Unexpected SQL Server error: {}", other)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

fn error_data(err: &DbError) -> serde_json::Value {
    let mut data = serde_json::json!({ "category": err.category() });
    if let Some(db) = err.database() {
        data["database"] = serde_json::Value::from(db);
    }
    if let Some(s) = err.suggestion() {
        data["suggestion"] = serde_json::Value::from(s);
    }
    data
}

/// Convert DbError to MCP ErrorData. The `data` object always carries the
/// stable category, plus the database name and suggestion when known.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = Some(error_data(&err));
        match &err {
            DbError::InvalidInput { .. } | DbError::Config { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), data)
            }

            DbError::DatabaseNotFound { .. } | DbError::TableNotFound { .. } => {
                rmcp::ErrorData::resource_not_found(err.to_string(), data)
            }

            DbError::Query {
                database,
                message,
                sql_state,
            } => {
                let msg = match sql_state {
                    Some(code) => format!(
                        "Query on '{}' failed: {} (SQLSTATE: {})",
                        database, message, code
                    ),
                    None => err.to_string(),
                };
                rmcp::ErrorData::invalid_params(msg, data)
            }

            DbError::Connection { .. }
            | DbError::PoolExhausted { .. }
            | DbError::Timeout { .. }
            | DbError::Cancelled { .. }
            | DbError::Internal { .. } => rmcp::ErrorData::internal_error(err.to_string(), data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_database() {
        let err = DbError::connection("sales", "refused", "Check host");
        assert!(err.to_string().contains("'sales'"));
        assert_eq!(err.database(), Some("sales"));
    }

    #[test]
    fn test_categories_are_stable_strings() {
        assert_eq!(
            DbError::database_not_found("x", vec![]).category().as_str(),
            "not_found"
        );
        assert_eq!(
            DbError::table_not_found("x", "t", None).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            DbError::pool_exhausted("x", 3).category().to_string(),
            "pool_exhausted"
        );
        assert_eq!(
            DbError::query("x", "syntax", None).category().as_str(),
            "query_execution_error"
        );
        assert_eq!(
            DbError::cancelled("x", "query").category().as_str(),
            "cancelled"
        );
        assert_eq!(DbError::config("bad").category().as_str(), "config_error");
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_value(ErrorCategory::QueryExecutionError).unwrap();
        assert_eq!(json, "query_execution_error");
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("db", "query", 30).is_retryable());
        assert!(DbError::connection("db", "err", "sugg").is_retryable());
        assert!(DbError::pool_exhausted("db", 1).is_retryable());
        assert!(!DbError::query("db", "syntax", None).is_retryable());
    }

    #[test]
    fn test_not_found_suggestion_lists_available() {
        let err = DbError::database_not_found("nope", vec!["a".into(), "b".into()]);
        assert!(err.suggestion().unwrap().contains("a, b"));
    }

    #[test]
    fn test_invalid_input_maps_to_invalid_params() {
        let mcp_err: rmcp::ErrorData = DbError::invalid_input("bad input").into();
        assert_eq!(mcp_err.code.0, -32602);
    }

    #[test]
    fn test_not_found_maps_to_resource_not_found() {
        let mcp_err: rmcp::ErrorData = DbError::database_not_found("missing", vec![]).into();
        assert_eq!(mcp_err.code.0, -32002);
        let data = mcp_err.data.unwrap();
        assert_eq!(data["category"], "not_found");
        assert_eq!(data["database"], "missing");
    }

    #[test]
    fn test_connection_maps_to_internal_error() {
        let mcp_err: rmcp::ErrorData = DbError::connection("db", "failed", "try again").into();
        assert_eq!(mcp_err.code.0, -32603);
        assert_eq!(mcp_err.data.unwrap()["suggestion"], "try again");
    }

    #[test]
    fn test_query_error_includes_sql_state() {
        let err = DbError::query("db", "syntax error", Some("42601".to_string()));
        let mcp_err: rmcp::ErrorData = err.into();
        assert_eq!(mcp_err.code.0, -32602);
        assert!(mcp_err.message.contains("42601"));
    }

    #[test]
    fn test_sqlx_pool_timeout_is_pool_exhausted() {
        let err = DbError::from_sqlx("db", sqlx::Error::PoolTimedOut);
        assert_eq!(err.category(), ErrorCategory::PoolExhausted);
    }

    #[test]
    fn test_sqlx_io_is_connection_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = DbError::from_sqlx("db", sqlx::Error::Io(io));
        assert_eq!(err.category(), ErrorCategory::ConnectionError);
        assert_eq!(err.database(), Some("db"));
    }
}
