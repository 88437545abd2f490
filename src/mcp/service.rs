//! MCP service implementation using rmcp.
//!
//! This module defines the MultiDbService struct with all database tools
//! exposed via the MCP protocol using the rmcp framework's macros.

use crate::db::{FanOutCoordinator, PoolManager, QueryExecutor, SchemaInspector};
use crate::tools::query::{
    MultiQueryInput, MultiQueryOutput, QueryInput, QueryOutput, QueryToolHandler,
};
use crate::tools::schema::{
    DescribeTableInput, DescribeTableOutput, ListDatabasesOutput, ListSchemasInput,
    ListSchemasOutput, ListTablesInput, ListTablesOutput, SchemaToolHandler,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;
use std::time::Duration;

/// Shared components every tool call runs against.
#[derive(Clone)]
pub struct ServiceContext {
    pub pools: Arc<PoolManager>,
    pub executor: Arc<QueryExecutor>,
    pub fanout: Arc<FanOutCoordinator>,
    pub inspector: Arc<SchemaInspector>,
}

impl ServiceContext {
    /// Wire executor, fan-out coordinator and inspector over one pool manager.
    pub fn new(pools: Arc<PoolManager>, query_timeout: Duration, fanout_timeout: Duration) -> Self {
        let executor = Arc::new(QueryExecutor::new(pools.clone(), query_timeout));
        let fanout = Arc::new(FanOutCoordinator::new(executor.clone(), fanout_timeout));
        let inspector = Arc::new(SchemaInspector::new(pools.clone(), query_timeout));
        Self {
            pools,
            executor,
            fanout,
            inspector,
        }
    }
}

#[derive(Clone)]
pub struct MultiDbService {
    query: Arc<QueryToolHandler>,
    schema: Arc<SchemaToolHandler>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl MultiDbService {
    pub fn new(context: &ServiceContext) -> Self {
        Self {
            query: Arc::new(QueryToolHandler::new(
                context.executor.clone(),
                context.fanout.clone(),
            )),
            schema: Arc::new(SchemaToolHandler::new(
                context.pools.clone(),
                context.inspector.clone(),
            )),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl MultiDbService {
    #[tool(
        description = "List all configured databases.\nReturns each logical name, engine (postgresql/mysql/sqlserver/sqlite), connection status and physical database name.\nCall this first: every other tool takes a database_name from this list."
    )]
    async fn list_databases(&self) -> Json<ListDatabasesOutput> {
        Json(self.schema.list_databases())
    }

    #[tool(
        description = "Execute SQL on one database and return the last result set.\nSupports positional parameters ($1 for PostgreSQL, ? for MySQL/SQLite, @P1 for SQL Server).\nStatements that return no rows report rows_affected.\nOutput format: json (default), table, or markdown."
    )]
    async fn query_database(
        &self,
        Parameters(input): Parameters<QueryInput>,
    ) -> Result<Json<QueryOutput>, McpError> {
        self.query.query(input).await.map(Json).map_err(Into::into)
    }

    #[tool(
        description = "List tables and views in a database.\nDefaults to the engine's default schema (public, dbo, main, or the current MySQL database)."
    )]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
    ) -> Result<Json<ListTablesOutput>, McpError> {
        self.schema
            .list_tables(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Get column details for a table: name, native and normalized type, nullability, default, primary key and key flags, maximum length.\nReturns a not-found error if the table does not exist."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> Result<Json<DescribeTableOutput>, McpError> {
        self.schema
            .describe_table(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "List schemas in a database.\nFor MySQL this is the current database only."
    )]
    async fn list_schemas(
        &self,
        Parameters(input): Parameters<ListSchemasInput>,
    ) -> Result<Json<ListSchemasOutput>, McpError> {
        self.schema
            .list_schemas(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Execute the same SQL on several databases concurrently.\nReturns one entry per distinct database name: either a result or an error with its category.\nOne database failing does not affect the others."
    )]
    async fn query_multiple_databases(
        &self,
        Parameters(input): Parameters<MultiQueryInput>,
    ) -> Result<Json<MultiQueryOutput>, McpError> {
        self.query
            .query_many(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }
}

#[tool_handler]
impl ServerHandler for MultiDbService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "multidb-mcp-server".to_owned(),
                title: Some("Multi-Database MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Query and introspection tools over PostgreSQL, MySQL, SQL Server and SQLite.\n\
                \n\
                ## Workflow\n\
                1. Call `list_databases` to get the configured database names\n\
                2. Use a `database_name` from step 1 in every other tool call\n\
                3. Explore with `list_schemas`, `list_tables` and `describe_table`\n\
                4. Run SQL with `query_database`, or `query_multiple_databases` to compare several databases\n\
                \n\
                ## Errors\n\
                Error data carries a `category`: config_error, not_found, connection_error, pool_exhausted,\n\
                query_execution_error, timeout, cancelled, invalid_input or internal.\n\
                \n\
                ## Dialects\n\
                SQL is passed through unchanged, so write it in the target engine's dialect.\n\
                Placeholders: `$1` PostgreSQL, `?` MySQL and SQLite, `@P1` SQL Server."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AdapterRegistry;

    fn create_test_service() -> MultiDbService {
        let registry = Arc::new(AdapterRegistry::new(Vec::new()).unwrap());
        let pools = Arc::new(PoolManager::new(registry));
        let context = ServiceContext::new(pools, Duration::from_secs(5), Duration::from_secs(10));
        MultiDbService::new(&context)
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert_eq!(info.server_info.name, "multidb-mcp-server");
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn test_all_tools_registered() {
        let service = create_test_service();
        let mut names: Vec<String> = service
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "describe_table",
                "list_databases",
                "list_schemas",
                "list_tables",
                "query_database",
                "query_multiple_databases",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_database_maps_to_not_found() {
        let service = create_test_service();
        let err = service
            .list_schemas(Parameters(ListSchemasInput {
                database_name: "nope".to_string(),
            }))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, rmcp::model::ErrorCode::RESOURCE_NOT_FOUND);
        assert_eq!(err.data.unwrap()["category"], "not_found");
    }
}
