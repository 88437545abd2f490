//! Integration tests for multi-database queries.
//!
//! Tests verify that:
//! - Every distinct requested name gets exactly one entry
//! - One failing or unknown database never fails the others
//! - Unreachable servers surface as connection errors
//! - The overall deadline and caller cancellation leave no connection checked out

mod common;

use common::{context_from_json, context_with_fanout_timeout, json_path, temp_sqlite_path};
use multidb_mcp_server::error::ErrorCategory;
use multidb_mcp_server::models::{DatabaseOutcome, QueryRequest};
use multidb_mcp_server::tools::query::{MultiQueryInput, QueryToolHandler};
use serde_json::json;
use std::time::Duration;

const SLOW_COUNT: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 20000000) SELECT COUNT(*) AS n FROM c";

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn two_sqlite_context() -> multidb_mcp_server::mcp::ServiceContext {
    context_from_json(&format!(
        r#"{{"sqlite": {{
            "east": {{"database": ":memory:"}},
            "west": {{"database": {}}}
        }}}}"#,
        json_path(&temp_sqlite_path())
    ))
}

/// Two file databases with their pools already open.
async fn warm_pair(fanout_timeout: Duration) -> multidb_mcp_server::mcp::ServiceContext {
    let context = context_with_fanout_timeout(
        &format!(
            r#"{{"sqlite": {{
                "fast": {{"database": {}}},
                "slow": {{"database": {}}}
            }}}}"#,
            json_path(&temp_sqlite_path()),
            json_path(&temp_sqlite_path())
        ),
        fanout_timeout,
    );
    for name in ["fast", "slow"] {
        context
            .executor
            .run_query(name, &QueryRequest::new("SELECT 1"))
            .await
            .unwrap();
    }
    context
}

/// Leases are dropped by aborted tasks, which may finish just after the caller returns.
async fn wait_for_idle(context: &multidb_mcp_server::mcp::ServiceContext) {
    for _ in 0..100 {
        if context.pools.in_use() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("connections still checked out: {}", context.pools.in_use());
}

#[tokio::test]
async fn test_two_ok_one_not_found() {
    let context = two_sqlite_context();
    let results = context
        .fanout
        .run_query_many(
            &names(&["east", "west", "north"]),
            &QueryRequest::new("SELECT 1 AS x"),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    for name in ["east", "west"] {
        match &results[name] {
            DatabaseOutcome::Ok { result } => assert_eq!(result.rows[0]["x"], json!(1)),
            other => panic!("{} failed: {:?}", name, other),
        }
    }
    assert_eq!(
        results["north"].error_category(),
        Some(ErrorCategory::NotFound)
    );
}

#[tokio::test]
async fn test_duplicates_collapse_to_one_entry() {
    let context = two_sqlite_context();
    let results = context
        .fanout
        .run_query_many(
            &names(&["east", " east ", "east", ""]),
            &QueryRequest::new("SELECT 1 AS x"),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results["east"].is_ok());
}

#[tokio::test]
async fn test_per_database_query_error_is_isolated() {
    let context = two_sqlite_context();
    context
        .executor
        .run_query("west", &QueryRequest::new("CREATE TABLE only_west (v INTEGER)"))
        .await
        .unwrap();

    let results = context
        .fanout
        .run_query_many(
            &names(&["east", "west"]),
            &QueryRequest::new("SELECT COUNT(*) AS n FROM only_west"),
        )
        .await
        .unwrap();

    assert!(results["west"].is_ok());
    assert_eq!(
        results["east"].error_category(),
        Some(ErrorCategory::QueryExecutionError)
    );
}

#[tokio::test]
async fn test_unreachable_servers_are_connection_errors() {
    let context = context_from_json(
        r#"{
            "sqlite": {"local": {"database": ":memory:"}},
            "postgresql": {"pg_down": {"host": "127.0.0.1", "port": 1, "user": "u", "password": "p", "database": "d", "acquire_timeout_secs": 3}},
            "sqlserver": {"mssql_down": {"host": "127.0.0.1", "port": 1, "user": "sa", "password": "p", "database": "d", "acquire_timeout_secs": 3}}
        }"#,
    );

    let results = context
        .fanout
        .run_query_many(
            &names(&["local", "pg_down", "mssql_down"]),
            &QueryRequest::new("SELECT 1 AS x"),
        )
        .await
        .unwrap();

    assert!(results["local"].is_ok());
    for name in ["pg_down", "mssql_down"] {
        assert_eq!(
            results[name].error_category(),
            Some(ErrorCategory::ConnectionError),
            "{}: {:?}",
            name,
            results[name]
        );
    }
}

#[tokio::test]
async fn test_unopenable_sqlite_path_is_connection_error() {
    let context = context_from_json(
        r#"{"sqlite": {"broken": {"database": "/nonexistent-dir/deeper/db.sqlite"}}}"#,
    );
    let err = context
        .executor
        .run_query("broken", &QueryRequest::new("SELECT 1"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ConnectionError);
}

#[tokio::test]
async fn test_empty_name_list_is_invalid_input() {
    let context = two_sqlite_context();
    let err = context
        .fanout
        .run_query_many(&names(&["  "]), &QueryRequest::new("SELECT 1"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidInput);
}

#[tokio::test]
async fn test_query_many_tool_counts() {
    let context = two_sqlite_context();
    let handler = QueryToolHandler::new(context.executor.clone(), context.fanout.clone());
    let output = handler
        .query_many(MultiQueryInput {
            database_names: names(&["east", "west", "missing"]),
            query: "SELECT 1 AS x".to_string(),
            params: vec![],
            limit: None,
            timeout_secs: None,
            decode_binary: true,
        })
        .await
        .unwrap();

    assert_eq!(output.succeeded, 2);
    assert_eq!(output.failed, 1);

    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["results"]["missing"]["error"]["category"], "not_found");
}

#[tokio::test]
async fn test_overall_deadline_reports_timeout_and_frees_connections() {
    let context = warm_pair(Duration::from_millis(300)).await;

    let started = std::time::Instant::now();
    let results = context
        .fanout
        .run_query_many(&names(&["fast", "slow"]), &QueryRequest::new(SLOW_COUNT))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(results.len(), 2);
    for name in ["fast", "slow"] {
        assert_eq!(
            results[name].error_category(),
            Some(ErrorCategory::Timeout),
            "{}: {:?}",
            name,
            results[name]
        );
    }

    assert_eq!(context.pools.in_use(), 0);
    for name in ["fast", "slow"] {
        assert_eq!(context.pools.snapshot(name).unwrap().discarded, 1);
    }
}

#[tokio::test]
async fn test_dropped_fan_out_discards_connections() {
    let context = warm_pair(Duration::from_secs(20)).await;
    let before = context.pools.snapshot("slow").unwrap().discarded;

    let targets = names(&["fast", "slow"]);
    let request = QueryRequest::new(SLOW_COUNT);
    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        context.fanout.run_query_many(&targets, &request),
    )
    .await;
    assert!(outcome.is_err());

    wait_for_idle(&context).await;
    assert!(context.pools.snapshot("slow").unwrap().discarded > before);
    assert!(context.pools.snapshot("fast").unwrap().discarded > 0);
}
