//! SQL dialect adapter.
//!
//! A [`Dialect`] is selected once at startup and passed by value to everything
//! that needs to produce DDL or read the catalog. It provides:
//! - A translation table from [`LogicalType`] to dialect type names
//! - Normalization of catalog type names back to [`LogicalType`]
//! - DDL rendering for the logical intents in [`ddl`]
//!
//! Operations with no safe translation for a dialect fail with
//! [`MigrationError::UnsupportedDialectFeature`](crate::MigrationError) rather
//! than silently degrading.

pub mod ddl;
pub mod types;

pub use ddl::{AddColumn, AlterNullability, ColumnDef, CreateIndex, CreateTable};
pub use types::{CatalogType, LogicalType};

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Supported relational database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// H2 (embedded Java database).
    H2,
    /// Microsoft SQL Server.
    MsSql,
    /// MySQL / MariaDB.
    MySql,
    /// Oracle Database.
    Oracle,
    /// PostgreSQL.
    PostgreSql,
    /// SQLite.
    Sqlite,
}

/// Error returned when a dialect id or URL cannot be recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown dialect: {0}")]
pub struct UnknownDialect(pub String);

impl Dialect {
    /// All dialects, in id order.
    pub const ALL: [Dialect; 6] = [
        Dialect::H2,
        Dialect::MsSql,
        Dialect::MySql,
        Dialect::Oracle,
        Dialect::PostgreSql,
        Dialect::Sqlite,
    ];

    /// Stable lowercase identifier of the dialect.
    pub fn id(&self) -> &'static str {
        match self {
            Dialect::H2 => "h2",
            Dialect::MsSql => "mssql",
            Dialect::MySql => "mysql",
            Dialect::Oracle => "oracle",
            Dialect::PostgreSql => "postgresql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Infer the dialect from a connection URL.
    pub fn from_url(url: &str) -> Result<Self, UnknownDialect> {
        let lower = url.trim().to_ascii_lowercase();
        let lower = lower.strip_prefix("jdbc:").unwrap_or(&lower);

        let dialect = if lower.starts_with("postgres://") || lower.starts_with("postgresql:") {
            Dialect::PostgreSql
        } else if lower.starts_with("mysql:") || lower.starts_with("mariadb:") {
            Dialect::MySql
        } else if lower.starts_with("sqlserver:") || lower.starts_with("mssql:") {
            Dialect::MsSql
        } else if lower.starts_with("oracle:") {
            Dialect::Oracle
        } else if lower.starts_with("h2:") {
            Dialect::H2
        } else if lower.starts_with("sqlite:")
            || lower == ":memory:"
            || lower.ends_with(".db")
            || lower.ends_with(".sqlite")
            || lower.ends_with(".sqlite3")
        {
            Dialect::Sqlite
        } else {
            return Err(UnknownDialect(url.to_string()));
        };

        Ok(dialect)
    }

    /// Whether DDL statements take part in transactions on this dialect.
    ///
    /// Informational only: steps never rely on it for idempotency.
    pub fn supports_transactional_ddl(&self) -> bool {
        matches!(self, Dialect::PostgreSql | Dialect::MsSql | Dialect::Sqlite | Dialect::H2)
    }

    /// Whether indexes can be built without blocking writes.
    pub fn supports_online_index(&self) -> bool {
        matches!(
            self,
            Dialect::PostgreSql | Dialect::MsSql | Dialect::Oracle | Dialect::MySql
        )
    }

    /// Whether an existing column's nullability can be altered in place.
    pub fn supports_alter_nullability(&self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }

    /// Maximum length accepted for a [`LogicalType::String`] column.
    pub fn max_string_length(&self) -> u32 {
        4000
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h2" => Ok(Dialect::H2),
            "mssql" | "sqlserver" => Ok(Dialect::MsSql),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "oracle" => Ok(Dialect::Oracle),
            "postgresql" | "postgres" | "pg" => Ok(Dialect::PostgreSql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(UnknownDialect(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        for dialect in Dialect::ALL {
            assert_eq!(dialect.id().parse::<Dialect>().unwrap(), dialect);
        }
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!("Postgres".parse::<Dialect>().unwrap(), Dialect::PostgreSql);
        assert_eq!("sqlserver".parse::<Dialect>().unwrap(), Dialect::MsSql);
        assert!("db2".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_from_url() {
        assert_eq!(
            Dialect::from_url("postgres://sonar@localhost/sonar").unwrap(),
            Dialect::PostgreSql
        );
        assert_eq!(
            Dialect::from_url("jdbc:postgresql://localhost/sonar").unwrap(),
            Dialect::PostgreSql
        );
        assert_eq!(Dialect::from_url("jdbc:h2:mem:test").unwrap(), Dialect::H2);
        assert_eq!(
            Dialect::from_url("jdbc:oracle:thin:@localhost:1521/XE").unwrap(),
            Dialect::Oracle
        );
        assert_eq!(
            Dialect::from_url("sqlserver://localhost;databaseName=sonar").unwrap(),
            Dialect::MsSql
        );
        assert_eq!(Dialect::from_url("mysql://localhost/sonar").unwrap(), Dialect::MySql);
        assert_eq!(Dialect::from_url("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert_eq!(Dialect::from_url("/var/lib/strata/app.db").unwrap(), Dialect::Sqlite);
        assert!(Dialect::from_url("redis://localhost").is_err());
    }

    #[test]
    fn test_capabilities() {
        assert!(Dialect::PostgreSql.supports_online_index());
        assert!(!Dialect::H2.supports_online_index());
        assert!(!Dialect::Sqlite.supports_online_index());
        assert!(!Dialect::Sqlite.supports_alter_nullability());
        assert!(Dialect::Oracle.supports_alter_nullability());
        assert!(!Dialect::MySql.supports_transactional_ddl());
    }
}
