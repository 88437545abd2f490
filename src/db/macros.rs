//! Engine dispatch macros for reducing code duplication.
//!
//! The adapter layer is a closed set of enums with one variant per engine.
//! These macros generate the match arms so each operation reads as one line
//! per engine.

/// Dispatch over the variants of a driver pool.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     Postgres(p) => postgres::close(p).await,
///     MySql(p) => mysql::close(p).await,
///     SQLite(p) => sqlite::close(p).await,
///     SqlServer(p) => sqlserver::close(p).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::adapters::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Dispatch over the variants of a borrowed engine connection.
#[macro_export]
macro_rules! impl_conn_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::adapters::EngineConnection::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_conn_dispatch;
pub use impl_db_dispatch;
