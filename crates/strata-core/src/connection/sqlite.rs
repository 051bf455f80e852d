//! SQLite connection over rusqlite.

use std::path::Path;

use rusqlite::types::ValueRef;

use super::{Connection, Row, SqlValue};
use crate::dialect::Dialect;
use crate::error::DbError;

/// SQLite connection.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = rusqlite::Connection::open(path)?;
        // Concurrent migrators on the same file wait instead of failing fast.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self {
            conn: rusqlite::Connection::open_in_memory()?,
        })
    }

    /// Access the underlying rusqlite connection.
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query([])?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(match row.get_ref(i)? {
                    ValueRef::Null => SqlValue::Null,
                    ValueRef::Integer(v) => SqlValue::Integer(v),
                    ValueRef::Real(v) => SqlValue::Text(v.to_string()),
                    ValueRef::Text(v) | ValueRef::Blob(v) => {
                        SqlValue::Text(String::from_utf8_lossy(v).into_owned())
                    }
                });
            }
            result.push(Row(values));
        }
        Ok(result)
    }
}
