//! Migration ledger.
//!
//! A single-column table holding one row per applied migration identifier.
//! The ledger is append-only: rows are inserted, never updated or deleted.
//! Creation and insertion both tolerate losing a race against another
//! migrator, so concurrent runs waste work but never corrupt the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::MigrationError;
use super::step::MigrationId;
use crate::connection::{quote_literal, Connection};
use crate::dialect::ddl::{validate_identifier, Ddl};
use crate::dialect::{ColumnDef, CreateTable, Dialect, LogicalType};
use crate::error::{DbError, DbErrorKind};
use crate::introspect::SchemaIntrospector;

/// Default ledger table name.
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// Default ledger column name.
pub const DEFAULT_LEDGER_COLUMN: &str = "identifier";

/// Width of the identifier column.
pub const LEDGER_COLUMN_LENGTH: u32 = 255;

/// Where the ledger lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Ledger table name.
    pub table: String,
    /// Identifier column name. Ledgers written by older releases use `version`.
    pub column: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_LEDGER_TABLE.to_string(),
            column: DEFAULT_LEDGER_COLUMN.to_string(),
        }
    }
}

impl LedgerConfig {
    /// Ledger in `table` with the default column.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Set the identifier column name.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }
}

/// A ledger row, returned when a migration is recorded.
///
/// The timestamp is taken when the row is written and is not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Applied migration.
    pub id: MigrationId,
    /// When the entry was recorded.
    pub applied_at: DateTime<Utc>,
}

/// Reads and appends the migration ledger.
#[derive(Debug, Clone, Default)]
pub struct MigrationHistory {
    config: LedgerConfig,
}

impl MigrationHistory {
    /// Create a history store for the given ledger.
    pub fn new(config: LedgerConfig) -> Self {
        Self { config }
    }

    /// Ledger location.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Table definition used when the ledger is created.
    pub fn ledger_table(&self) -> CreateTable {
        CreateTable::new(&self.config.table)
            .with_column(ColumnDef::new(
                &self.config.column,
                LogicalType::String(LEDGER_COLUMN_LENGTH),
            ))
            .with_primary_key([self.config.column.as_str()])
    }

    /// Whether the ledger table exists.
    pub fn ledger_exists(&self, conn: &mut dyn Connection) -> Result<bool, MigrationError> {
        self.check_identifiers(conn.dialect())?;
        SchemaIntrospector::new(conn)
            .table_exists(&self.config.table)
            .map_err(|err| self.unavailable(err))
    }

    /// Create the ledger unless it exists. Returns `true` if it was created.
    ///
    /// An existing ledger is never altered. Losing the creation race against
    /// another migrator counts as success.
    pub fn ensure_ledger_exists(&self, conn: &mut dyn Connection) -> Result<bool, MigrationError> {
        let dialect = conn.dialect();
        let statements = self.ledger_table().render(dialect)?;

        if self.ledger_exists(conn)? {
            self.check_column(conn)?;
            debug!(table = %self.config.table, "migration ledger present");
            return Ok(false);
        }

        for sql in &statements {
            if let Err(source) = conn.execute(sql) {
                if source.is_already_exists() && self.ledger_exists(conn)? {
                    debug!(table = %self.config.table, "migration ledger created concurrently");
                    return Ok(false);
                }
                return Err(MigrationError::LedgerUnavailable {
                    table: self.config.table.clone(),
                    source,
                });
            }
        }

        info!(table = %self.config.table, dialect = %dialect, "created migration ledger");
        Ok(true)
    }

    /// Whether `id` has been recorded.
    pub fn is_applied(
        &self,
        conn: &mut dyn Connection,
        id: MigrationId,
    ) -> Result<bool, MigrationError> {
        self.check_identifiers(conn.dialect())?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = {}",
            self.config.table,
            self.config.column,
            quote_literal(&id.to_string())
        );
        let rows = self.query(conn, &sql)?;
        Ok(rows.first().and_then(|r| r.i64(0)).unwrap_or(0) > 0)
    }

    /// Record `id` as applied.
    ///
    /// A duplicate-key failure means the row is already there, which is the
    /// desired end state.
    pub fn record_applied(
        &self,
        conn: &mut dyn Connection,
        id: MigrationId,
    ) -> Result<HistoryEntry, MigrationError> {
        self.check_identifiers(conn.dialect())?;
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.config.table,
            self.config.column,
            quote_literal(&id.to_string())
        );
        match conn.execute(&sql) {
            Ok(()) => debug!(id = %id, "recorded migration"),
            Err(source) if source.is_duplicate_key() => {
                debug!(id = %id, "migration already recorded")
            }
            Err(source) => {
                return Err(MigrationError::LedgerUnavailable {
                    table: self.config.table.clone(),
                    source,
                })
            }
        }
        Ok(HistoryEntry {
            id,
            applied_at: Utc::now(),
        })
    }

    /// Every recorded identifier, ascending.
    ///
    /// Rows that do not parse as identifiers are logged and skipped.
    pub fn applied(&self, conn: &mut dyn Connection) -> Result<Vec<MigrationId>, MigrationError> {
        self.check_identifiers(conn.dialect())?;
        let sql = format!("SELECT {} FROM {}", self.config.column, self.config.table);
        let mut ids = Vec::new();
        for row in self.query(conn, &sql)? {
            let raw = row.string(0).unwrap_or_default();
            match raw.parse::<MigrationId>() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(
                    table = %self.config.table,
                    value = %raw,
                    "ignoring unparsable ledger row"
                ),
            }
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Highest recorded identifier.
    pub fn highest_applied(
        &self,
        conn: &mut dyn Connection,
    ) -> Result<Option<MigrationId>, MigrationError> {
        Ok(self.applied(conn)?.last().copied())
    }

    fn check_identifiers(&self, dialect: Dialect) -> Result<(), MigrationError> {
        validate_identifier(dialect, &self.config.table)?;
        validate_identifier(dialect, &self.config.column)
    }

    fn check_column(&self, conn: &mut dyn Connection) -> Result<(), MigrationError> {
        let present = SchemaIntrospector::new(conn)
            .column_exists(&self.config.table, &self.config.column)
            .map_err(|err| self.unavailable(err))?;
        if present {
            return Ok(());
        }
        Err(MigrationError::LedgerUnavailable {
            table: self.config.table.clone(),
            source: DbError::driver(
                DbErrorKind::Other,
                format!("ledger column {} not found", self.config.column),
            ),
        })
    }

    fn query(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
    ) -> Result<Vec<crate::connection::Row>, MigrationError> {
        conn.query(sql).map_err(|source| MigrationError::LedgerUnavailable {
            table: self.config.table.clone(),
            source,
        })
    }

    fn unavailable(&self, err: MigrationError) -> MigrationError {
        match err {
            MigrationError::StepExecutionFailure { source, .. } => {
                MigrationError::LedgerUnavailable {
                    table: self.config.table.clone(),
                    source,
                }
            }
            other => other,
        }
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::connection::SqliteConnection;

    fn history() -> MigrationHistory {
        MigrationHistory::default()
    }

    #[test]
    fn test_ensure_ledger_twice() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        assert!(history().ensure_ledger_exists(&mut conn).unwrap());
        assert!(!history().ensure_ledger_exists(&mut conn).unwrap());

        let mut introspector = SchemaIntrospector::new(&mut conn);
        let column = introspector
            .column(DEFAULT_LEDGER_TABLE, DEFAULT_LEDGER_COLUMN)
            .unwrap()
            .unwrap();
        assert_eq!(column.sql_type, Some(LogicalType::String(255)));
        assert!(!column.nullable);
    }

    #[test]
    fn test_existing_ledger_is_not_altered() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE schema_migrations (version VARCHAR(255) NOT NULL)")
            .unwrap();
        conn.execute("INSERT INTO schema_migrations (version) VALUES ('1')").unwrap();

        let history = MigrationHistory::new(LedgerConfig::default().with_column("version"));
        assert!(!history.ensure_ledger_exists(&mut conn).unwrap());
        assert_eq!(history.applied(&mut conn).unwrap(), vec![MigrationId::new(1)]);
    }

    #[test]
    fn test_ledger_with_wrong_column_is_unavailable() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE schema_migrations (version VARCHAR(255) NOT NULL)")
            .unwrap();
        let err = history().ensure_ledger_exists(&mut conn).unwrap_err();
        assert!(matches!(err, MigrationError::LedgerUnavailable { .. }));
    }

    #[test]
    fn test_record_applied_is_idempotent() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let history = history();
        history.ensure_ledger_exists(&mut conn).unwrap();

        let id = MigrationId::new(2);
        assert!(!history.is_applied(&mut conn, id).unwrap());

        let entry = history.record_applied(&mut conn, id).unwrap();
        assert_eq!(entry.id, id);
        history.record_applied(&mut conn, id).unwrap();

        assert!(history.is_applied(&mut conn, id).unwrap());
        let rows = conn.query("SELECT COUNT(*) FROM schema_migrations").unwrap();
        assert_eq!(rows[0].i64(0), Some(1));
    }

    #[test]
    fn test_applied_sorts_numerically_and_skips_garbage() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let history = history();
        history.ensure_ledger_exists(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (identifier) VALUES ('10'), ('9'), ('legacy-1'), ('2')",
        )
        .unwrap();

        let applied = history.applied(&mut conn).unwrap();
        assert_eq!(
            applied,
            vec![MigrationId::new(2), MigrationId::new(9), MigrationId::new(10)]
        );
        assert_eq!(history.highest_applied(&mut conn).unwrap(), Some(MigrationId::new(10)));
    }

    #[test]
    fn test_missing_ledger_is_unavailable_for_reads() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let err = history().applied(&mut conn).unwrap_err();
        assert!(matches!(err, MigrationError::LedgerUnavailable { .. }));
        assert!(!history().ledger_exists(&mut conn).unwrap());
    }

    #[test]
    fn test_invalid_ledger_name_rejected() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let history = MigrationHistory::new(LedgerConfig::new("schema migrations"));
        assert!(matches!(
            history.ensure_ledger_exists(&mut conn),
            Err(MigrationError::UnsupportedDialectFeature { .. })
        ));
    }
}
