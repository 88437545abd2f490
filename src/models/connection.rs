//! Connection-related data models.
//!
//! This module defines the engine enumeration, the validated per-database
//! configuration and the summary returned by `list_databases`.

use crate::config::PoolOptions;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// In-memory SQLite sentinel.
pub const SQLITE_MEMORY: &str = ":memory:";

/// Supported database engine families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgresql,
    /// Includes MariaDB
    Mysql,
    Sqlserver,
    Sqlite,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Postgresql,
        EngineKind::Mysql,
        EngineKind::Sqlserver,
        EngineKind::Sqlite,
    ];

    /// Accepted spellings for this engine (compared case-insensitively).
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Postgresql => &["postgresql", "postgres", "pg"],
            Self::Mysql => &["mysql", "mariadb"],
            Self::Sqlserver => &["sqlserver", "mssql", "sql server"],
            Self::Sqlite => &["sqlite", "sqlite3"],
        }
    }

    /// Resolve an alias to its canonical engine.
    pub fn from_alias(alias: &str) -> Option<Self> {
        let lower = alias.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.aliases().contains(&lower.as_str()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
            Self::Sqlserver => "sqlserver",
            Self::Sqlite => "sqlite",
        }
    }

    /// Get the display name for this engine.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgresql => "PostgreSQL",
            Self::Mysql => "MySQL",
            Self::Sqlserver => "SQL Server",
            Self::Sqlite => "SQLite",
        }
    }

    /// Get the default port for this engine.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgresql => Some(5432),
            Self::Mysql => Some(3306),
            Self::Sqlserver => Some(1433),
            Self::Sqlite => None,
        }
    }

    /// Schema used when a caller does not name one. MySQL has no fixed
    /// default; the current database is used instead.
    pub fn default_schema(&self) -> Option<&'static str> {
        match self {
            Self::Postgresql => Some("public"),
            Self::Sqlserver => Some("dbo"),
            Self::Sqlite => Some("main"),
            Self::Mysql => None,
        }
    }

    pub fn is_network(&self) -> bool {
        !matches!(self, Self::Sqlite)
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated connection parameters. Network fields are `None` for SQLite.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// Sensitive - never log
    pub password: Option<String>,
    /// Database name, or file path / `:memory:` for SQLite.
    pub database: String,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
}

impl ConnectionParams {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            database: path.into(),
            encrypt: false,
            trust_server_certificate: false,
        }
    }

    pub fn network(
        host: impl Into<String>,
        port: Option<u16>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            port,
            user: Some(user.into()),
            password: Some(password.into()),
            database: database.into(),
            encrypt: false,
            trust_server_certificate: false,
        }
    }

    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn is_sqlite_memory(&self) -> bool {
        self.database == SQLITE_MEMORY
    }
}

/// Configuration for one logical database. Immutable after load.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub name: String,
    pub kind: EngineKind,
    pub params: ConnectionParams,
    pub pool: PoolOptions,
}

impl DatabaseConfig {
    /// Create a validated database configuration.
    pub fn new(
        name: impl Into<String>,
        kind: EngineKind,
        params: ConnectionParams,
        pool: PoolOptions,
    ) -> Result<Self, ConnectionConfigError> {
        let name = name.into();

        if name.is_empty() {
            return Err(ConnectionConfigError::EmptyName);
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConnectionConfigError::InvalidName(name));
        }

        if kind.is_network() {
            for (field, value) in [
                ("host", &params.host),
                ("user", &params.user),
                ("password", &params.password),
            ] {
                if value.is_none() {
                    return Err(ConnectionConfigError::MissingField {
                        name,
                        field: field.to_string(),
                    });
                }
            }
        }
        if params.database.is_empty() {
            return Err(ConnectionConfigError::MissingField {
                name,
                field: "database".to_string(),
            });
        }

        pool.validate()
            .map_err(|reason| ConnectionConfigError::InvalidPool {
                name: name.clone(),
                reason,
            })?;

        Ok(Self {
            name,
            kind,
            params,
            pool,
        })
    }

    /// Host/port/database description safe for logs.
    pub fn target_description(&self) -> String {
        match (&self.params.host, self.kind.default_port()) {
            (Some(host), Some(default_port)) => format!(
                "{}:{}/{}",
                host,
                self.params.port.unwrap_or(default_port),
                self.params.database
            ),
            _ => self.params.database.clone(),
        }
    }
}

/// Errors that can occur when validating a database configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    #[error("Database name cannot be empty")]
    EmptyName,

    #[error("Database name contains invalid characters: {0}")]
    InvalidName(String),

    #[error("Database '{name}' is missing required field '{field}'")]
    MissingField { name: String, field: String },

    #[error("Database '{name}' has invalid pool options: {reason}")]
    InvalidPool { name: String, reason: String },
}

/// Reachability of a configured database as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Connected,
    Disconnected,
}

/// One entry of `list_databases`.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DatabaseSummary {
    pub name: String,
    pub engine: EngineKind,
    pub status: DatabaseStatus,
    /// Target database name or SQLite path.
    pub database: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_alias_resolves_to_its_engine() {
        for kind in EngineKind::ALL {
            for alias in kind.aliases() {
                assert_eq!(EngineKind::from_alias(alias), Some(kind));
                assert_eq!(EngineKind::from_alias(&alias.to_uppercase()), Some(kind));
            }
        }
    }

    #[test]
    fn test_alias_normalization() {
        assert_eq!(EngineKind::from_alias("PG"), Some(EngineKind::Postgresql));
        assert_eq!(EngineKind::from_alias("MariaDB"), Some(EngineKind::Mysql));
        assert_eq!(
            EngineKind::from_alias("SQL Server"),
            Some(EngineKind::Sqlserver)
        );
        assert_eq!(EngineKind::from_alias(" sqlite3 "), Some(EngineKind::Sqlite));
        assert_eq!(EngineKind::from_alias("oracle"), None);
        assert_eq!(EngineKind::from_alias(""), None);
    }

    #[test]
    fn test_default_schema_and_port() {
        assert_eq!(EngineKind::Postgresql.default_schema(), Some("public"));
        assert_eq!(EngineKind::Sqlserver.default_schema(), Some("dbo"));
        assert_eq!(EngineKind::Sqlite.default_schema(), Some("main"));
        assert_eq!(EngineKind::Mysql.default_schema(), None);
        assert_eq!(EngineKind::Sqlserver.default_port(), Some(1433));
        assert_eq!(EngineKind::Sqlite.default_port(), None);
    }

    #[test]
    fn test_database_config_new() {
        let params = ConnectionParams::network("db.local", None, "app", "secret", "sales");
        let config =
            DatabaseConfig::new("sales-pg", EngineKind::Postgresql, params, PoolOptions::default())
                .unwrap();

        assert_eq!(config.name, "sales-pg");
        assert_eq!(config.target_description(), "db.local:5432/sales");
        assert!(!config.target_description().contains("secret"));
    }

    #[test]
    fn test_database_config_missing_host() {
        let mut params = ConnectionParams::network("h", None, "u", "p", "d");
        params.host = None;
        let result = DatabaseConfig::new("x", EngineKind::Mysql, params, PoolOptions::default());
        assert!(matches!(
            result,
            Err(ConnectionConfigError::MissingField { field, .. }) if field == "host"
        ));
    }

    #[test]
    fn test_database_config_invalid_name() {
        let result = DatabaseConfig::new(
            "my db",
            EngineKind::Sqlite,
            ConnectionParams::sqlite(SQLITE_MEMORY),
            PoolOptions::default(),
        );
        assert!(matches!(result, Err(ConnectionConfigError::InvalidName(_))));
    }

    #[test]
    fn test_database_config_empty_name() {
        let result = DatabaseConfig::new(
            "",
            EngineKind::Sqlite,
            ConnectionParams::sqlite(SQLITE_MEMORY),
            PoolOptions::default(),
        );
        assert!(matches!(result, Err(ConnectionConfigError::EmptyName)));
    }
}
