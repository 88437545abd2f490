//! Configuration handling for the multi-database MCP server.
//!
//! Process-level options come from CLI arguments and environment variables.
//! The set of databases comes from a JSON file shaped as
//! `{ "<engine alias>": { "<logical name>": { ...connection params } } }`.

use crate::error::{DbError, DbResult};
use crate::models::{ConnectionParams, DatabaseConfig, EngineKind, SQLITE_MEMORY};
use clap::{Parser, ValueEnum};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/app/databases.json";
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FANOUT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Per-database connection pool options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 5, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Maximum connection lifetime in seconds (default: 1800)
    pub max_lifetime_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on engine.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Never above the effective maximum.
    pub fn min_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.min_connections
            .unwrap_or(DEFAULT_MIN_CONNECTIONS)
            .min(self.max_connections_or_default(is_sqlite))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs.unwrap_or(DEFAULT_MAX_LIFETIME_SECS))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == Some(0) {
            return Err("max_connections must be greater than 0".to_string());
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Configuration for the multi-database MCP server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "multidb-mcp-server",
    about = "MCP server exposing one query and introspection surface over PostgreSQL, MySQL, SQL Server and SQLite",
    version,
    author
)]
pub struct Config {
    /// Path to the JSON file describing the databases to serve
    #[arg(
        short,
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        env = "DB_CONFIG_PATH"
    )]
    pub config_path: PathBuf,

    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "MCP_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "MCP_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "MCP_HTTP_PORT"
    )]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_MCP_ENDPOINT,
        env = "MCP_ENDPOINT"
    )]
    pub mcp_endpoint: String,

    /// Default per-query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "MCP_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Overall bound for one multi-database query in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_FANOUT_TIMEOUT_SECS,
        env = "MCP_FANOUT_TIMEOUT"
    )]
    pub fanout_timeout: u64,

    /// Seconds to wait for in-flight queries at shutdown before cancelling them
    #[arg(
        long,
        default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS,
        env = "MCP_SHUTDOWN_GRACE"
    )]
    pub shutdown_grace: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            fanout_timeout: DEFAULT_FANOUT_TIMEOUT_SECS,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Load and validate the database file named by `--config`.
    pub fn load_databases(&self) -> DbResult<Vec<DatabaseConfig>> {
        load_database_configs(&self.config_path)
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn fanout_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.fanout_timeout)
    }

    pub fn shutdown_grace_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Read and validate a database configuration file.
pub fn load_database_configs(path: &Path) -> DbResult<Vec<DatabaseConfig>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        DbError::config(format!(
            "Cannot read database config '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_database_configs(&text)
}

/// Parse and validate database configuration JSON.
///
/// Sections are keyed by engine alias; an unknown alias, a duplicate logical
/// name (within or across sections) or a missing required field is an error.
/// Entries keep file order.
pub fn parse_database_configs(text: &str) -> DbResult<Vec<DatabaseConfig>> {
    let sections: OrderedMap<OrderedMap<RawDatabaseEntry>> = serde_json::from_str(text)
        .map_err(|e| DbError::config(format!("Invalid database config JSON: {}", e)))?;

    let mut seen = HashSet::new();
    let mut configs = Vec::new();

    for (alias, entries) in sections.0 {
        let kind = EngineKind::from_alias(&alias).ok_or_else(|| {
            DbError::config(format!(
                "Unknown database type '{}'. Supported: postgresql, mysql, sqlserver, sqlite",
                alias
            ))
        })?;

        for (name, raw) in entries.0 {
            if !seen.insert(name.clone()) {
                return Err(DbError::config(format!(
                    "Duplicate database name '{}'",
                    name
                )));
            }
            let params = raw.to_params(kind, &name)?;
            let pool = raw.pool.clone();
            let config = DatabaseConfig::new(name, kind, params, pool)
                .map_err(|e| DbError::config(e.to_string()))?;
            configs.push(config);
        }
    }

    Ok(configs)
}

/// One entry of the database file before validation.
#[derive(Debug, Deserialize)]
struct RawDatabaseEntry {
    host: Option<String>,
    port: Option<u16>,
    #[serde(alias = "username")]
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    path: Option<String>,
    encrypt: Option<serde_json::Value>,
    trust_server_certificate: Option<serde_json::Value>,
    #[serde(flatten)]
    pool: PoolOptions,
}

impl RawDatabaseEntry {
    fn to_params(&self, kind: EngineKind, name: &str) -> DbResult<ConnectionParams> {
        let flag = |field: &str, value: &Option<serde_json::Value>| -> DbResult<bool> {
            match value {
                None => Ok(false),
                Some(v) => parse_flag(v).ok_or_else(|| {
                    DbError::config(format!(
                        "Database '{}': '{}' must be a boolean, got {}",
                        name, field, v
                    ))
                }),
            }
        };

        let database = match kind {
            EngineKind::Sqlite => self
                .database
                .clone()
                .or_else(|| self.path.clone())
                .unwrap_or_else(|| SQLITE_MEMORY.to_string()),
            _ => self.database.clone().unwrap_or_default(),
        };

        Ok(ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database,
            encrypt: flag("encrypt", &self.encrypt)?,
            trust_server_certificate: flag(
                "trust_server_certificate",
                &self.trust_server_certificate,
            )?,
        })
    }
}

/// Accepts JSON booleans, 0/1 and the strings "true"/"yes"/"1" (and their
/// negatives).
fn parse_flag(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_i64().map(|i| i != 0),
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// JSON object kept as ordered key/value pairs so duplicate keys can be seen.
struct OrderedMap<V>(Vec<(String, V)>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport, TransportMode::Stdio);
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_http_bind_addr() {
        let config = Config {
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            ..Config::default()
        };
        assert_eq!(config.http_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_timeout_durations() {
        let config = Config {
            query_timeout: 60,
            fanout_timeout: 90,
            shutdown_grace: 5,
            ..Config::default()
        };
        assert_eq!(config.query_timeout_duration(), Duration::from_secs(60));
        assert_eq!(config.fanout_timeout_duration(), Duration::from_secs(90));
        assert_eq!(config.shutdown_grace_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_all_engines_with_aliases() {
        let json = r#"{
            "postgres": { "main": { "host": "pg", "user": "u", "password": "p", "database": "app" } },
            "MariaDB": { "shop": { "host": "my", "username": "u", "password": "p", "database": "shop", "port": 3307 } },
            "mssql": { "erp": { "host": "ms", "user": "sa", "password": "p", "database": "erp", "trust_server_certificate": "yes" } },
            "sqlite3": { "local": { "path": "/tmp/x.db" }, "scratch": {} }
        }"#;
        let configs = parse_database_configs(json).unwrap();
        let names: Vec<_> = configs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["main", "shop", "erp", "local", "scratch"]);

        assert_eq!(configs[0].kind, EngineKind::Postgresql);
        assert_eq!(configs[1].kind, EngineKind::Mysql);
        assert_eq!(configs[1].params.port, Some(3307));
        assert_eq!(configs[1].params.user.as_deref(), Some("u"));
        assert_eq!(configs[2].kind, EngineKind::Sqlserver);
        assert!(configs[2].params.trust_server_certificate);
        assert!(!configs[2].params.encrypt);
        assert_eq!(configs[3].params.database, "/tmp/x.db");
        assert_eq!(configs[4].params.database, SQLITE_MEMORY);
    }

    #[test]
    fn test_unknown_engine_is_config_error() {
        let err = parse_database_configs(r#"{ "oracle": { "x": {} } }"#).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ConfigError);
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_duplicate_name_across_sections() {
        let json = r#"{
            "sqlite": { "db": {} },
            "pg": { "db": { "host": "h", "user": "u", "password": "p", "database": "d" } }
        }"#;
        let err = parse_database_configs(json).unwrap_err();
        assert!(err.to_string().contains("Duplicate database name 'db'"));
    }

    #[test]
    fn test_duplicate_name_within_section() {
        let json = r#"{ "sqlite": { "db": {}, "db": { "path": "x.db" } } }"#;
        assert!(parse_database_configs(json).is_err());
    }

    #[test]
    fn test_same_engine_split_over_alias_sections() {
        let json = r#"{ "sqlite": { "a": {} }, "sqlite3": { "b": {} } }"#;
        let configs = parse_database_configs(json).unwrap();
        assert_eq!(configs.len(), 2);
        assert!(configs.iter().all(|c| c.kind == EngineKind::Sqlite));
    }

    #[test]
    fn test_missing_required_field() {
        let json = r#"{ "mysql": { "m": { "host": "h", "user": "u", "database": "d" } } }"#;
        let err = parse_database_configs(json).unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_pool_options_from_entry() {
        let json = r#"{ "sqlite": { "a": { "max_connections": 4, "acquire_timeout_secs": 2 } } }"#;
        let configs = parse_database_configs(json).unwrap();
        assert_eq!(configs[0].pool.max_connections, Some(4));
        assert_eq!(configs[0].pool.acquire_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_pool_options_rejected() {
        let json = r#"{ "sqlite": { "a": { "max_connections": 2, "min_connections": 3 } } }"#;
        let err = parse_database_configs(json).unwrap_err();
        assert!(err.to_string().contains("min_connections"));
    }

    #[test]
    fn test_invalid_flag_rejected() {
        let json = r#"{ "mssql": { "m": { "host": "h", "user": "u", "password": "p", "database": "d", "encrypt": "maybe" } } }"#;
        assert!(parse_database_configs(json).is_err());
    }

    #[test]
    fn test_parse_flag_values() {
        assert_eq!(parse_flag(&serde_json::json!(true)), Some(true));
        assert_eq!(parse_flag(&serde_json::json!("YES")), Some(true));
        assert_eq!(parse_flag(&serde_json::json!("1")), Some(true));
        assert_eq!(parse_flag(&serde_json::json!(0)), Some(false));
        assert_eq!(parse_flag(&serde_json::json!("no")), Some(false));
        assert_eq!(parse_flag(&serde_json::json!([])), None);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = parse_database_configs("{ not json").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ConfigError);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_database_configs(Path::new("/nonexistent/databases.json")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ConfigError);
    }

    #[test]
    fn test_pool_options_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections_or_default(false), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(opts.max_connections_or_default(true), DEFAULT_MAX_CONNECTIONS_SQLITE);
        assert_eq!(opts.min_connections_or_default(false), DEFAULT_MIN_CONNECTIONS);
        assert_eq!(opts.acquire_timeout(), Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS));
        assert_eq!(opts.max_lifetime(), Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS));
        assert!(opts.test_before_acquire_or_default());
    }

    #[test]
    fn test_pool_options_validation() {
        let zero_max = PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(zero_max.validate().is_err());

        let zero_min = PoolOptions {
            min_connections: Some(0),
            ..Default::default()
        };
        assert!(zero_min.validate().is_err());

        let ok = PoolOptions {
            max_connections: Some(3),
            min_connections: Some(3),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }
}
