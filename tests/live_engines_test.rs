//! Tests against live PostgreSQL, MySQL and SQL Server servers.
//!
//! Each test is skipped unless its environment variable holds a JSON object
//! of connection parameters, e.g.
//! `MULTIDB_TEST_POSTGRES='{"host":"localhost","user":"postgres","password":"pw","database":"test"}'`.
//! Variables: `MULTIDB_TEST_POSTGRES`, `MULTIDB_TEST_MYSQL`, `MULTIDB_TEST_SQLSERVER`.

mod common;

use common::context_from_json;
use multidb_mcp_server::error::ErrorCategory;
use multidb_mcp_server::mcp::ServiceContext;
use multidb_mcp_server::models::{QueryParam, QueryRequest, TableKind};
use serde_json::json;

fn live_context(env_var: &str, alias: &str) -> Option<ServiceContext> {
    let params = match std::env::var(env_var) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => {
            eprintln!("{} not set, skipping", env_var);
            return None;
        }
    };
    Some(context_from_json(&format!(
        r#"{{"{}": {{"live": {}}}}}"#,
        alias, params
    )))
}

/// Create a scratch table, describe it, query it and drop it.
async fn exercise_engine(context: &ServiceContext, create: &str, insert: &str, select: &str) {
    let run = |sql: String| {
        let executor = context.executor.clone();
        async move { executor.run_query("live", &QueryRequest::new(sql)).await }
    };

    let _ = run("DROP TABLE mcp_live_scratch".to_string()).await;
    run(create.to_string()).await.unwrap();

    let affected = run(insert.to_string()).await.unwrap();
    assert_eq!(affected.rows_affected, Some(2));

    let result = run(select.to_string()).await.unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0]["label"], json!("alpha"));

    let tables = context.inspector.list_tables("live", None).await.unwrap();
    let scratch = tables
        .iter()
        .find(|t| t.name == "mcp_live_scratch")
        .expect("scratch table listed");
    assert_eq!(scratch.kind, TableKind::Table);

    let columns = context
        .inspector
        .describe_table("live", "mcp_live_scratch", None)
        .await
        .unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0].name, "id");
    assert!(columns[0].is_primary_key);
    assert!(!columns[0].nullable);
    assert_eq!(columns[1].name, "label");
    assert_eq!(columns[1].max_length, Some(40));

    let missing = context
        .inspector
        .describe_table("live", "mcp_live_absent", None)
        .await
        .unwrap_err();
    assert_eq!(missing.category(), ErrorCategory::NotFound);

    let schemas = context.inspector.list_schemas("live").await.unwrap();
    assert!(!schemas.is_empty());

    run("DROP TABLE mcp_live_scratch".to_string()).await.unwrap();
    context.pools.shutdown(std::time::Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_postgres_live() {
    let Some(context) = live_context("MULTIDB_TEST_POSTGRES", "postgresql") else {
        return;
    };

    let result = context
        .executor
        .run_query(
            "live",
            &QueryRequest::new("SELECT $1::int4 + 1 AS n, 'x'::text AS s")
                .with_param(QueryParam::Int(41)),
        )
        .await
        .unwrap();
    assert_eq!(result.rows[0]["n"], json!(42));

    exercise_engine(
        &context,
        "CREATE TABLE mcp_live_scratch (id INTEGER PRIMARY KEY, label VARCHAR(40))",
        "INSERT INTO mcp_live_scratch VALUES (1, 'alpha'), (2, 'beta')",
        "SELECT id, label FROM mcp_live_scratch ORDER BY id",
    )
    .await;
}

#[tokio::test]
async fn test_mysql_live() {
    let Some(context) = live_context("MULTIDB_TEST_MYSQL", "mysql") else {
        return;
    };

    let result = context
        .executor
        .run_query(
            "live",
            &QueryRequest::new("SELECT ? + 1 AS n").with_param(QueryParam::Int(41)),
        )
        .await
        .unwrap();
    assert_eq!(result.rows[0]["n"], json!(42));

    exercise_engine(
        &context,
        "CREATE TABLE mcp_live_scratch (id INT PRIMARY KEY, label VARCHAR(40))",
        "INSERT INTO mcp_live_scratch VALUES (1, 'alpha'), (2, 'beta')",
        "SELECT id, label FROM mcp_live_scratch ORDER BY id",
    )
    .await;
}

#[tokio::test]
async fn test_sqlserver_live() {
    let Some(context) = live_context("MULTIDB_TEST_SQLSERVER", "sqlserver") else {
        return;
    };

    let result = context
        .executor
        .run_query(
            "live",
            &QueryRequest::new("SELECT @P1 + 1 AS n").with_param(QueryParam::Int(41)),
        )
        .await
        .unwrap();
    assert_eq!(result.rows[0]["n"], json!(42));

    exercise_engine(
        &context,
        "CREATE TABLE mcp_live_scratch (id INT NOT NULL PRIMARY KEY, label NVARCHAR(40))",
        "INSERT INTO mcp_live_scratch VALUES (1, 'alpha'), (2, 'beta')",
        "SELECT id, label FROM mcp_live_scratch ORDER BY id",
    )
    .await;
}
