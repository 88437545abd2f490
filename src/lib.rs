//! Multi-Database MCP Server Library
//!
//! This library provides MCP (Model Context Protocol) tools for AI assistants
//! to query and introspect PostgreSQL, MySQL/MariaDB, SQL Server and SQLite
//! databases through one surface.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use mcp::{MultiDbService, ServiceContext};
