//! Positional parameter binding.
//!
//! Each engine binds `QueryParam` values natively against its own
//! placeholders: `$1` for PostgreSQL, `?` for MySQL and SQLite, `@P1` for
//! SQL Server. SQL text is never rewritten.

use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// Generates a binder for one sqlx backend. All three accept the same Rust
/// types, so the match is shared.
macro_rules! sqlx_binder {
    ($(#[$doc:meta])* $name:ident<$lt:lifetime>, $db:ty, $args:ty) => {
        $(#[$doc])*
        pub(crate) fn $name<$lt>(
            query: Query<$lt, $db, $args>,
            param: &$lt QueryParam,
        ) -> Query<$lt, $db, $args> {
            match param {
                QueryParam::Null => query.bind(None::<&str>),
                QueryParam::Bool(v) => query.bind(*v),
                QueryParam::Int(v) => query.bind(*v),
                QueryParam::Float(v) => query.bind(*v),
                QueryParam::String(v) => query.bind(v.as_str()),
                QueryParam::Bytes(v) => query.bind(v.as_slice()),
            }
        }
    };
}

sqlx_binder!(
    /// Bind one parameter to a PostgreSQL statement.
    bind_postgres_param<'q>, Postgres, PgArguments
);
sqlx_binder!(
    /// Bind one parameter to a MySQL statement.
    bind_mysql_param<'q>, MySql, MySqlArguments
);
sqlx_binder!(
    /// Bind one parameter to a SQLite statement.
    bind_sqlite_param<'q>, Sqlite, SqliteArguments<'q>
);

/// Bind one parameter to a SQL Server statement as the next `@Pn`.
pub(crate) fn bind_sqlserver_param<'a>(query: &mut tiberius::Query<'a>, param: &'a QueryParam) {
    match param {
        QueryParam::Null => query.bind(Option::<&str>::None),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::{Connection, Row, SqliteConnection};

    #[tokio::test]
    async fn test_sqlite_binds_every_kind() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let params = vec![
            QueryParam::Null,
            QueryParam::Bool(true),
            QueryParam::Int(i64::MAX),
            QueryParam::Float(2.5),
            QueryParam::String("héllo".into()),
            QueryParam::Bytes(vec![0xde, 0xad]),
        ];

        let mut query = sqlx::query(
            "SELECT ?1 IS NULL AS a, ?2 AS b, ?3 AS c, ?4 AS d, ?5 AS e, hex(?6) AS f",
        );
        for param in &params {
            query = bind_sqlite_param(query, param);
        }
        let row = query.fetch_one(&mut conn).await.unwrap();

        assert!(row.get::<bool, _>("a"));
        assert!(row.get::<bool, _>("b"));
        assert_eq!(row.get::<i64, _>("c"), i64::MAX);
        assert_eq!(row.get::<f64, _>("d"), 2.5);
        assert_eq!(row.get::<String, _>("e"), "héllo");
        assert_eq!(row.get::<String, _>("f"), "DEAD");
    }
}
