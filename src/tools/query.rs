//! Query execution tools.
//!
//! This module implements the `query_database` and `query_multiple_databases`
//! MCP tools. Statements run as given; no read-only filtering is applied.

use crate::db::{FanOutCoordinator, QueryExecutor};
use crate::error::DbResult;
use crate::models::{
    ColumnMetadata, DatabaseOutcome, MAX_ROW_LIMIT, QueryParam, QueryRequest, QueryResult,
};
use crate::tools::format::{OutputFormat, format_as_markdown, format_as_table};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Default value for decode_binary field.
fn default_decode_binary() -> bool {
    true
}

/// Input for the query_database tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// Logical database name from list_databases
    pub database_name: String,
    /// SQL to execute. Several statements may be separated by semicolons; the last result set is returned.
    pub query: String,
    /// Positional parameters (placeholders: $1 for PostgreSQL, ? for MySQL/SQLite, @P1 for SQL Server)
    #[serde(default)]
    pub params: Vec<QueryParamInput>,
    /// Maximum rows to return. Default: 100, max: 10000
    #[serde(default)]
    pub limit: Option<u32>,
    /// Query timeout in seconds. Default: server setting (30), max: 300
    #[serde(default)]
    pub timeout_secs: Option<u32>,
    /// Output format: "json" returns structured data, "table" returns ASCII table, "markdown" returns markdown table
    #[serde(default)]
    pub format: OutputFormat,
    /// If true (default), try to decode binary columns as UTF-8 text first (fallback to base64). If false, always use base64 encoding.
    #[serde(default = "default_decode_binary")]
    pub decode_binary: bool,
}

/// Input for the query_multiple_databases tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MultiQueryInput {
    /// Logical database names. Duplicates run once.
    pub database_names: Vec<String>,
    /// SQL to execute on every database
    pub query: String,
    /// Positional parameters, bound the same way on every database
    #[serde(default)]
    pub params: Vec<QueryParamInput>,
    /// Maximum rows per database. Default: 100, max: 10000
    #[serde(default)]
    pub limit: Option<u32>,
    /// Per-database query timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u32>,
    #[serde(default = "default_decode_binary")]
    pub decode_binary: bool,
}

/// Input parameter that can be various JSON types.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum QueryParamInput {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Arrays and objects are bound as their JSON text
    Json(JsonValue),
}

impl From<QueryParamInput> for QueryParam {
    fn from(input: QueryParamInput) -> Self {
        match input {
            QueryParamInput::Null => QueryParam::Null,
            QueryParamInput::Bool(v) => QueryParam::Bool(v),
            QueryParamInput::Int(v) => QueryParam::Int(v),
            QueryParamInput::Float(v) => QueryParam::Float(v),
            QueryParamInput::String(v) => QueryParam::String(v),
            QueryParamInput::Json(v) => QueryParam::from_json(&v),
        }
    }
}

fn build_request(
    query: String,
    params: Vec<QueryParamInput>,
    limit: Option<u32>,
    timeout_secs: Option<u32>,
    decode_binary: bool,
) -> QueryRequest {
    let mut request = QueryRequest::new(query)
        .with_params(params.into_iter().map(Into::into).collect())
        .with_decode_binary(decode_binary);
    request.limit = limit;
    request.timeout_secs = timeout_secs;
    request
}

fn limit_warning(limit: Option<u32>) -> Option<String> {
    limit.filter(|l| *l > MAX_ROW_LIMIT).map(|requested| {
        format!(
            "Requested limit {} exceeds maximum allowed ({}). Results capped to {} rows.",
            requested, MAX_ROW_LIMIT, MAX_ROW_LIMIT
        )
    })
}

/// Output from the query_database tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryOutput {
    pub database_name: String,
    /// Column metadata. Empty if format is table/markdown.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnMetadata>,
    /// Result rows as key-value maps. Empty if format is table/markdown.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// Pre-formatted output when format is table or markdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    /// Set for statements that returned no rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    /// True if result was truncated due to limit
    pub truncated: bool,
    pub row_count: usize,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl QueryOutput {
    pub fn from_result(
        database_name: &str,
        result: QueryResult,
        format: OutputFormat,
        warning: Option<String>,
    ) -> Self {
        let formatted = match format {
            OutputFormat::Json => None,
            OutputFormat::Table => Some(format_as_table(&result)),
            OutputFormat::Markdown => Some(format_as_markdown(&result)),
        };
        let row_count = result.row_count();
        let (columns, rows) = if formatted.is_some() {
            (Vec::new(), Vec::new())
        } else {
            (result.columns, result.rows)
        };

        Self {
            database_name: database_name.to_string(),
            columns,
            rows,
            formatted,
            rows_affected: result.rows_affected,
            truncated: result.truncated,
            row_count,
            execution_time_ms: result.execution_time_ms,
            warning,
        }
    }
}

/// Output from the query_multiple_databases tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct MultiQueryOutput {
    /// One entry per distinct requested database
    pub results: BTreeMap<String, DatabaseOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Handler for the query tools.
pub struct QueryToolHandler {
    executor: Arc<QueryExecutor>,
    fanout: Arc<FanOutCoordinator>,
}

impl QueryToolHandler {
    pub fn new(executor: Arc<QueryExecutor>, fanout: Arc<FanOutCoordinator>) -> Self {
        Self { executor, fanout }
    }

    pub async fn query(&self, input: QueryInput) -> DbResult<QueryOutput> {
        let warning = limit_warning(input.limit);
        let database = input.database_name.trim().to_string();
        let request = build_request(
            input.query,
            input.params,
            input.limit,
            input.timeout_secs,
            input.decode_binary,
        );

        let result = self.executor.run_query(&database, &request).await?;

        info!(
            database = %database,
            row_count = result.row_count(),
            truncated = result.truncated,
            execution_time_ms = result.execution_time_ms,
            "Query executed"
        );

        Ok(QueryOutput::from_result(
            &database,
            result,
            input.format,
            warning,
        ))
    }

    pub async fn query_many(&self, input: MultiQueryInput) -> DbResult<MultiQueryOutput> {
        let warning = limit_warning(input.limit);
        let request = build_request(
            input.query,
            input.params,
            input.limit,
            input.timeout_secs,
            input.decode_binary,
        );

        let results = self
            .fanout
            .run_query_many(&input.database_names, &request)
            .await?;
        let succeeded = results.values().filter(|o| o.is_ok()).count();
        let failed = results.len() - succeeded;

        info!(succeeded, failed, "Multi-database query executed");

        Ok(MultiQueryOutput {
            results,
            succeeded,
            failed,
            warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_input_deserialization() {
        let json = r#"{
            "database_name": "analytics",
            "query": "SELECT * FROM users WHERE id = $1",
            "params": [42, "x", null, 1.5, true],
            "limit": 100
        }"#;

        let input: QueryInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.database_name, "analytics");
        assert_eq!(input.params.len(), 5);
        assert_eq!(input.limit, Some(100));
        assert_eq!(input.format, OutputFormat::Json);
        // decode_binary should default to true
        assert!(input.decode_binary);

        let params: Vec<QueryParam> = input.params.into_iter().map(Into::into).collect();
        assert_eq!(
            params,
            vec![
                QueryParam::Int(42),
                QueryParam::String("x".into()),
                QueryParam::Null,
                QueryParam::Float(1.5),
                QueryParam::Bool(true),
            ]
        );
    }

    #[test]
    fn test_nested_param_bound_as_json_text() {
        let input: QueryParamInput = serde_json::from_str(r#"{"a":[1,2]}"#).unwrap();
        assert_eq!(
            QueryParam::from(input),
            QueryParam::String(r#"{"a":[1,2]}"#.into())
        );
    }

    #[test]
    fn test_multi_query_input_deserialization() {
        let json = r#"{
            "database_names": ["a", "b"],
            "query": "SELECT 1",
            "decode_binary": false
        }"#;
        let input: MultiQueryInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.database_names, vec!["a", "b"]);
        assert!(input.params.is_empty());
        assert!(!input.decode_binary);
    }

    #[test]
    fn test_limit_warning() {
        assert!(limit_warning(None).is_none());
        assert!(limit_warning(Some(MAX_ROW_LIMIT)).is_none());
        assert!(limit_warning(Some(MAX_ROW_LIMIT + 1)).unwrap().contains("capped"));
    }

    #[test]
    fn test_query_output_formats() {
        let mut row = serde_json::Map::new();
        row.insert("x".to_string(), JsonValue::Number(1.into()));
        let result = QueryResult {
            columns: vec![ColumnMetadata::new("x", "INTEGER")],
            rows: vec![row],
            rows_affected: None,
            truncated: false,
            execution_time_ms: 10,
        };

        let json_out = QueryOutput::from_result("db", result.clone(), OutputFormat::Json, None);
        let json = serde_json::to_string(&json_out).unwrap();
        assert!(json.contains("\"row_count\":1"));
        assert!(json.contains("\"x\":1"));
        assert!(!json.contains("formatted"));

        let table_out = QueryOutput::from_result("db", result, OutputFormat::Table, None);
        assert!(table_out.rows.is_empty());
        assert_eq!(table_out.row_count, 1);
        assert!(table_out.formatted.unwrap().contains("| x |"));
    }
}
