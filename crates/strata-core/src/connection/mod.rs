//! Database connections.
//!
//! The engine talks to the database through the small [`Connection`] trait:
//! execute a statement, run a query returning rows, report the dialect.
//! Drivers are enabled by cargo features:
//! - `sqlite` (default): [`SqliteConnection`] over rusqlite
//! - `postgres`: [`PgConnection`] over sqlx

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PgConnection;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnection;

use crate::dialect::Dialect;
use crate::error::DbError;

/// A single value read from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Integer value.
    Integer(i64),
    /// Text value.
    Text(String),
}

impl SqlValue {
    /// Whether the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Read as text; integers are formatted.
    pub fn as_string(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        }
    }

    /// Read as an integer; numeric text is parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// A result row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    /// Value at `index`, `Null` when out of range.
    pub fn get(&self, index: usize) -> &SqlValue {
        self.0.get(index).unwrap_or(&SqlValue::Null)
    }

    /// Text value at `index`.
    pub fn string(&self, index: usize) -> Option<String> {
        self.get(index).as_string()
    }

    /// Integer value at `index`.
    pub fn i64(&self, index: usize) -> Option<i64> {
        self.get(index).as_i64()
    }
}

/// A synchronous database connection.
///
/// Statements are executed one at a time in autocommit mode; the engine never
/// relies on transactions around DDL.
pub trait Connection {
    /// Dialect spoken by the database behind this connection.
    fn dialect(&self) -> Dialect;

    /// Execute a statement that returns no rows.
    fn execute(&mut self, sql: &str) -> Result<(), DbError>;

    /// Run a query and collect all rows.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError>;
}

impl<C: Connection + ?Sized> Connection for &mut C {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        (**self).execute(sql)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        (**self).query(sql)
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        (**self).execute(sql)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        (**self).query(sql)
    }
}

/// Open a connection for `url`.
///
/// Only dialects with a compiled-in driver can be opened; the others are
/// still available for DDL rendering.
pub fn connect(url: &str, dialect: Dialect) -> Result<Box<dyn Connection>, DbError> {
    match dialect {
        #[cfg(feature = "sqlite")]
        Dialect::Sqlite => {
            let path = url
                .strip_prefix("sqlite://")
                .or_else(|| url.strip_prefix("sqlite:"))
                .unwrap_or(url);
            let conn = if path.is_empty() || path == ":memory:" {
                SqliteConnection::open_in_memory()?
            } else {
                SqliteConnection::open(path)?
            };
            Ok(Box::new(conn))
        }
        #[cfg(feature = "postgres")]
        Dialect::PostgreSql => Ok(Box::new(PgConnection::connect(url)?)),
        _ => Err(DbError::UnsupportedUrl(format!(
            "{url} (no driver compiled in for {dialect})"
        ))),
    }
}

/// Quote a string as a SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
