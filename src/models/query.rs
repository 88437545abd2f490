//! Query-related data models.
//!
//! This module defines types for SQL query requests, normalized results and the
//! per-database outcome used by multi-database queries.

use crate::error::{DbError, ErrorCategory};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Default row limit for query results.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// Maximum allowed row limit.
pub const MAX_ROW_LIMIT: u32 = 10000;

/// Maximum query timeout in seconds.
pub const MAX_QUERY_TIMEOUT_SECS: u32 = 300;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Convert a JSON tool argument into a parameter. Arrays and objects are
    /// passed as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Self::String(s.clone()),
            other => Self::String(other.to_string()),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A query to run against one or more logical databases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    /// Default: 100, max: 10000
    #[serde(default)]
    pub limit: Option<u32>,
    /// Falls back to the server-wide query timeout; max: 300
    #[serde(default)]
    pub timeout_secs: Option<u32>,
    /// Render binary columns as UTF-8 text when valid
    #[serde(default)]
    pub decode_binary: bool,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            limit: None,
            timeout_secs: None,
            decode_binary: false,
        }
    }

    pub fn with_param(mut self, param: QueryParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_decode_binary(mut self, decode_binary: bool) -> Self {
        self.decode_binary = decode_binary;
        self
    }

    /// Get the effective row limit (with bounds checking).
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .map(|l| l.clamp(1, MAX_ROW_LIMIT))
            .unwrap_or(DEFAULT_ROW_LIMIT)
    }

    /// Get the effective timeout, using `default` when the request names none.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        match self.timeout_secs {
            Some(t) => Duration::from_secs(t.clamp(1, MAX_QUERY_TIMEOUT_SECS) as u64),
            None => default,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "int8", "varchar", "TEXT")
    pub type_name: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Normalized result of one query.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// Only reported for statements that returned no rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a result for statements that produced no row set.
    pub fn affected(rows_affected: u64, execution_time_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(rows_affected),
            truncated: false,
            execution_time_ms,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Caller-facing description of a failure on one database.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryErrorReport {
    pub database: String,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl QueryErrorReport {
    /// Build a report for `database`. The error's own database takes
    /// precedence when it names one.
    pub fn from_error(database: &str, err: &DbError) -> Self {
        Self {
            database: err.database().unwrap_or(database).to_string(),
            category: err.category(),
            message: err.to_string(),
            suggestion: err.suggestion(),
        }
    }
}

/// Result of one target in a multi-database query.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DatabaseOutcome {
    Ok { result: QueryResult },
    Error { error: QueryErrorReport },
}

impl DatabaseOutcome {
    pub fn from_result(database: &str, result: Result<QueryResult, DbError>) -> Self {
        match result {
            Ok(result) => Self::Ok { result },
            Err(err) => Self::Error {
                error: QueryErrorReport::from_error(database, &err),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn error_category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { error } => Some(error.category),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(
            QueryParam::String("hello".to_string()).type_name(),
            "string"
        );
    }

    #[test]
    fn test_query_param_from_json() {
        assert_eq!(QueryParam::from_json(&serde_json::json!(7)), QueryParam::Int(7));
        assert_eq!(
            QueryParam::from_json(&serde_json::json!(1.5)),
            QueryParam::Float(1.5)
        );
        assert_eq!(
            QueryParam::from_json(&serde_json::json!([1, 2])),
            QueryParam::String("[1,2]".to_string())
        );
        assert!(QueryParam::from_json(&JsonValue::Null).is_null());
    }

    #[test]
    fn test_query_request_defaults() {
        let req = QueryRequest::new("SELECT * FROM users");
        assert_eq!(req.effective_limit(), DEFAULT_ROW_LIMIT);
        assert_eq!(
            req.effective_timeout(Duration::from_secs(12)),
            Duration::from_secs(12)
        );
    }

    #[test]
    fn test_query_request_bounds() {
        let req = QueryRequest::new("SELECT * FROM users")
            .with_limit(99999)
            .with_timeout(999);

        assert_eq!(req.effective_limit(), MAX_ROW_LIMIT);
        assert_eq!(
            req.effective_timeout(Duration::from_secs(30)),
            Duration::from_secs(MAX_QUERY_TIMEOUT_SECS as u64)
        );
        assert_eq!(QueryRequest::new("x").with_limit(0).effective_limit(), 1);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let ok = DatabaseOutcome::from_result("a", Ok(QueryResult::affected(2, 1)));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["result"]["rows_affected"], 2);

        let err = DatabaseOutcome::from_result(
            "missing",
            Err(DbError::database_not_found("missing", vec![])),
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["category"], "not_found");
        assert_eq!(json["error"]["database"], "missing");
        assert_eq!(err.error_category(), Some(ErrorCategory::NotFound));
    }
}
