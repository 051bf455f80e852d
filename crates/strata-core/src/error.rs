//! Database driver error types.

use thiserror::Error;

/// Classification of driver errors that the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// The object being created already exists (table, index, column).
    AlreadyExists,
    /// An insert violated a primary key or unique constraint.
    DuplicateKey,
    /// Anything else.
    Other,
}

/// Errors raised by a [`Connection`](crate::connection::Connection).
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite driver error.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL driver error.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Failed to start the async runtime backing a blocking driver.
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    /// No driver is available for the URL.
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),

    /// Error reported by a driver without a dedicated variant.
    #[error("{message}")]
    Driver {
        /// Classification of the failure.
        kind: DbErrorKind,
        /// Driver message.
        message: String,
    },
}

impl DbError {
    /// Create a driver error with an explicit classification.
    pub fn driver(kind: DbErrorKind, message: impl Into<String>) -> Self {
        DbError::Driver {
            kind,
            message: message.into(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> DbErrorKind {
        match self {
            #[cfg(feature = "sqlite")]
            DbError::Sqlite(e) => sqlite_kind(e),
            #[cfg(feature = "postgres")]
            DbError::Postgres(e) => postgres_kind(e),
            DbError::Driver { kind, .. } => *kind,
            DbError::Runtime(_) | DbError::UnsupportedUrl(_) => DbErrorKind::Other,
        }
    }

    /// Whether the error means the object being created is already there.
    pub fn is_already_exists(&self) -> bool {
        self.kind() == DbErrorKind::AlreadyExists
    }

    /// Whether the error is a primary key / unique violation.
    pub fn is_duplicate_key(&self) -> bool {
        self.kind() == DbErrorKind::DuplicateKey
    }
}

#[cfg(feature = "sqlite")]
fn sqlite_kind(error: &rusqlite::Error) -> DbErrorKind {
    use rusqlite::ErrorCode;

    match error {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.as_deref().unwrap_or_default();
            if failure.code == ErrorCode::ConstraintViolation
                && (matches!(
                    failure.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                ) || message.starts_with("UNIQUE constraint failed"))
            {
                return DbErrorKind::DuplicateKey;
            }
            // SQLite reports "table x already exists" as a generic error.
            if message.contains("already exists") || message.starts_with("duplicate column name") {
                DbErrorKind::AlreadyExists
            } else {
                DbErrorKind::Other
            }
        }
        _ => DbErrorKind::Other,
    }
}

#[cfg(feature = "postgres")]
fn postgres_kind(error: &sqlx::Error) -> DbErrorKind {
    let Some(db_error) = error.as_database_error() else {
        return DbErrorKind::Other;
    };
    match db_error.code().as_deref() {
        // duplicate_table, duplicate_object, duplicate_column
        Some("42P07") | Some("42710") | Some("42701") => DbErrorKind::AlreadyExists,
        // unique_violation
        Some("23505") => DbErrorKind::DuplicateKey,
        _ => DbErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_kind() {
        let err = DbError::driver(DbErrorKind::AlreadyExists, "table exists");
        assert!(err.is_already_exists());
        assert!(!err.is_duplicate_key());
        assert_eq!(err.to_string(), "table exists");
    }

    #[test]
    fn test_unsupported_url_is_other() {
        let err = DbError::UnsupportedUrl("redis://x".into());
        assert_eq!(err.kind(), DbErrorKind::Other);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_error_classification() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id VARCHAR(10) NOT NULL PRIMARY KEY)")
            .unwrap();

        let err: DbError = conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap_err().into();
        assert!(err.is_already_exists());

        conn.execute_batch("INSERT INTO t (id) VALUES ('a')").unwrap();
        let err: DbError = conn
            .execute_batch("INSERT INTO t (id) VALUES ('a')")
            .unwrap_err()
            .into();
        assert!(err.is_duplicate_key());
    }
}
