//! Read-only schema introspection.
//!
//! Answers "does table T exist", "does column C exist on T", and "what is the
//! definition of C" using catalog metadata queries for the connection's
//! dialect. Nothing is cached: every call re-reads the catalog, since a prior
//! step may have just changed it.

use tracing::trace;

use crate::connection::{quote_literal, Connection, Row};
use crate::dialect::{CatalogType, ColumnDef, Dialect, LogicalType};
use crate::migration::MigrationError;

/// Snapshot of a column as found in the live catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Table name as requested.
    pub table: String,
    /// Column name as requested.
    pub name: String,
    /// Type name reported by the catalog.
    pub raw_type: String,
    /// Normalized logical type, `None` if the type has no logical counterpart.
    pub sql_type: Option<LogicalType>,
    /// Character length for string types.
    pub length: Option<u32>,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl ColumnDefinition {
    /// Whether this live column matches the expected definition exactly
    /// (type, length and nullability).
    pub fn matches(&self, expected: &ColumnDef) -> bool {
        self.sql_type == Some(expected.logical_type) && self.nullable == expected.nullable
    }

    /// Human-readable summary, e.g. `STRING(40) NULL`.
    pub fn describe(&self) -> String {
        let sql_type = self
            .sql_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| self.raw_type.clone());
        format!("{} {}", sql_type, if self.nullable { "NULL" } else { "NOT NULL" })
    }
}

/// Describe an expected column the same way as [`ColumnDefinition::describe`].
pub fn describe_expected(column: &ColumnDef) -> String {
    format!(
        "{} {}",
        column.logical_type,
        if column.nullable { "NULL" } else { "NOT NULL" }
    )
}

/// Catalog state of a named index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No index with that name on the table.
    Absent,
    /// The index exists and is usable.
    Valid,
    /// The index exists but the database marks it unusable, e.g. after an
    /// interrupted `CREATE INDEX CONCURRENTLY` on PostgreSQL.
    Invalid,
}

/// Catalog reader bound to a connection.
pub struct SchemaIntrospector<'a> {
    conn: &'a mut dyn Connection,
    dialect: Dialect,
}

impl<'a> SchemaIntrospector<'a> {
    /// Create an introspector for `conn`.
    pub fn new(conn: &'a mut dyn Connection) -> Self {
        let dialect = conn.dialect();
        Self { conn, dialect }
    }

    /// Dialect of the underlying connection.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Check whether `table` exists in the current schema.
    pub fn table_exists(&mut self, table: &str) -> Result<bool, MigrationError> {
        let t = quote_literal(&table.to_ascii_lowercase());
        let sql = match self.dialect {
            Dialect::PostgreSql => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND LOWER(table_name) = {t}"
            ),
            Dialect::MySql => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND LOWER(table_name) = {t}"
            ),
            Dialect::MsSql => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = SCHEMA_NAME() AND LOWER(table_name) = {t}"
            ),
            Dialect::H2 => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = CURRENT_SCHEMA AND LOWER(table_name) = {t}"
            ),
            Dialect::Oracle => {
                format!("SELECT COUNT(*) FROM user_tables WHERE LOWER(table_name) = {t}")
            }
            Dialect::Sqlite => format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND LOWER(name) = {t}"
            ),
        };
        self.count(&sql).map(|n| n > 0)
    }

    /// Check whether `column` exists on `table`.
    pub fn column_exists(&mut self, table: &str, column: &str) -> Result<bool, MigrationError> {
        Ok(self.column(table, column)?.is_some())
    }

    /// Read the live definition of `table.column`, `None` if absent.
    pub fn column(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Option<ColumnDefinition>, MigrationError> {
        let t = quote_literal(&table.to_ascii_lowercase());
        let c = quote_literal(&column.to_ascii_lowercase());
        let sql = match self.dialect {
            Dialect::PostgreSql => format!(
                "SELECT CAST(data_type AS VARCHAR), CAST(character_maximum_length AS INTEGER), \
                 CAST(numeric_precision AS INTEGER), CAST(numeric_scale AS INTEGER), \
                 CAST(is_nullable AS VARCHAR) \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() \
                 AND LOWER(table_name) = {t} AND LOWER(column_name) = {c}"
            ),
            // column_type carries the display width that tells TINYINT(1) apart.
            Dialect::MySql => format!(
                "SELECT column_type, NULL, NULL, NULL, is_nullable \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() \
                 AND LOWER(table_name) = {t} AND LOWER(column_name) = {c}"
            ),
            Dialect::MsSql => format!(
                "SELECT data_type, character_maximum_length, numeric_precision, numeric_scale, \
                 is_nullable \
                 FROM information_schema.columns \
                 WHERE table_schema = SCHEMA_NAME() \
                 AND LOWER(table_name) = {t} AND LOWER(column_name) = {c}"
            ),
            Dialect::H2 => format!(
                "SELECT data_type, character_maximum_length, numeric_precision, numeric_scale, \
                 is_nullable \
                 FROM information_schema.columns \
                 WHERE table_schema = CURRENT_SCHEMA \
                 AND LOWER(table_name) = {t} AND LOWER(column_name) = {c}"
            ),
            Dialect::Oracle => format!(
                "SELECT data_type, char_length, data_precision, data_scale, nullable \
                 FROM user_tab_columns \
                 WHERE LOWER(table_name) = {t} AND LOWER(column_name) = {c}"
            ),
            Dialect::Sqlite => format!(
                "SELECT type, NULL, NULL, NULL, \
                 CASE WHEN \"notnull\" = 1 THEN 'NO' ELSE 'YES' END \
                 FROM pragma_table_info({t}) WHERE LOWER(name) = {c}"
            ),
        };

        let rows = self.query(&sql)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(decode_column(table, column, row)))
    }

    /// Check whether an index named `index` exists on `table`, valid or not.
    pub fn index_exists(&mut self, table: &str, index: &str) -> Result<bool, MigrationError> {
        Ok(self.index_state(table, index)? != IndexState::Absent)
    }

    /// Look up an index named `index` on `table`.
    ///
    /// Only PostgreSQL tracks index validity; elsewhere an existing index is
    /// always [`IndexState::Valid`].
    pub fn index_state(&mut self, table: &str, index: &str) -> Result<IndexState, MigrationError> {
        let t = quote_literal(&table.to_ascii_lowercase());
        let i = quote_literal(&index.to_ascii_lowercase());
        let sql = match self.dialect {
            // Second column counts indexes left invalid by a failed concurrent build.
            Dialect::PostgreSql => format!(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN ix.indisvalid THEN 0 ELSE 1 END), 0) \
                 FROM pg_index ix \
                 JOIN pg_class ic ON ic.oid = ix.indexrelid \
                 JOIN pg_class tc ON tc.oid = ix.indrelid \
                 JOIN pg_namespace ns ON ns.oid = ic.relnamespace \
                 WHERE ns.nspname = current_schema() \
                 AND LOWER(tc.relname) = {t} AND LOWER(ic.relname) = {i}"
            ),
            Dialect::MySql => format!(
                "SELECT COUNT(*) FROM information_schema.statistics \
                 WHERE table_schema = DATABASE() \
                 AND LOWER(table_name) = {t} AND LOWER(index_name) = {i}"
            ),
            Dialect::MsSql => format!(
                "SELECT COUNT(*) FROM sys.indexes ix \
                 JOIN sys.tables tb ON ix.object_id = tb.object_id \
                 WHERE LOWER(tb.name) = {t} AND LOWER(ix.name) = {i}"
            ),
            Dialect::H2 => format!(
                "SELECT COUNT(*) FROM information_schema.indexes \
                 WHERE table_schema = CURRENT_SCHEMA \
                 AND LOWER(table_name) = {t} AND LOWER(index_name) = {i}"
            ),
            Dialect::Oracle => format!(
                "SELECT COUNT(*) FROM user_indexes \
                 WHERE LOWER(table_name) = {t} AND LOWER(index_name) = {i}"
            ),
            Dialect::Sqlite => format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' \
                 AND LOWER(tbl_name) = {t} AND LOWER(name) = {i}"
            ),
        };

        let rows = self.query(&sql)?;
        let row = rows.first();
        let found = row.and_then(|r| r.i64(0)).unwrap_or(0);
        let invalid = row.and_then(|r| r.i64(1)).unwrap_or(0);
        Ok(match (found, invalid) {
            (0, _) => IndexState::Absent,
            (_, 0) => IndexState::Valid,
            _ => IndexState::Invalid,
        })
    }

    fn count(&mut self, sql: &str) -> Result<i64, MigrationError> {
        let rows = self.query(sql)?;
        Ok(rows.first().and_then(|r| r.i64(0)).unwrap_or(0))
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, MigrationError> {
        trace!(dialect = %self.dialect, sql, "catalog query");
        self.conn
            .query(sql)
            .map_err(|source| MigrationError::StepExecutionFailure {
                sql: sql.to_string(),
                source,
            })
    }
}

fn decode_column(table: &str, column: &str, row: &Row) -> ColumnDefinition {
    let catalog_type = CatalogType {
        type_name: row.string(0).unwrap_or_default(),
        char_length: row.i64(1),
        numeric_precision: row.i64(2),
        numeric_scale: row.i64(3),
    };
    let sql_type = catalog_type.normalize();
    let nullable = row
        .string(4)
        .map(|v| v.trim().to_ascii_uppercase().starts_with('Y'))
        .unwrap_or(true);

    ColumnDefinition {
        table: table.to_string(),
        name: column.to_string(),
        raw_type: catalog_type.type_name,
        sql_type,
        length: sql_type.and_then(|t| t.length()),
        nullable,
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::connection::SqliteConnection;

    fn setup() -> SqliteConnection {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE rules (\
                uuid VARCHAR(40) NOT NULL, \
                name VARCHAR(200) NULL, \
                priority INTEGER NOT NULL, \
                description TEXT, \
                shape GEOMETRY)",
        )
        .unwrap();
        conn.execute("CREATE INDEX rules_name ON rules (name)").unwrap();
        conn
    }

    #[test]
    fn test_table_exists() {
        let mut conn = setup();
        let mut introspector = SchemaIntrospector::new(&mut conn);
        assert!(introspector.table_exists("rules").unwrap());
        assert!(introspector.table_exists("RULES").unwrap());
        assert!(!introspector.table_exists("issues").unwrap());
    }

    #[test]
    fn test_column_definition() {
        let mut conn = setup();
        let mut introspector = SchemaIntrospector::new(&mut conn);

        let uuid = introspector.column("rules", "uuid").unwrap().unwrap();
        assert_eq!(uuid.sql_type, Some(LogicalType::String(40)));
        assert_eq!(uuid.length, Some(40));
        assert!(!uuid.nullable);

        let name = introspector.column("rules", "name").unwrap().unwrap();
        assert_eq!(name.sql_type, Some(LogicalType::String(200)));
        assert!(name.nullable);

        let description = introspector.column("rules", "description").unwrap().unwrap();
        assert_eq!(description.sql_type, Some(LogicalType::Clob));
        assert_eq!(description.length, None);
    }

    #[test]
    fn test_unknown_type_keeps_raw_name() {
        let mut conn = setup();
        let mut introspector = SchemaIntrospector::new(&mut conn);
        let shape = introspector.column("rules", "shape").unwrap().unwrap();
        assert_eq!(shape.sql_type, None);
        assert_eq!(shape.raw_type, "GEOMETRY");
        assert_eq!(shape.describe(), "GEOMETRY NULL");
    }

    #[test]
    fn test_missing_column_and_table() {
        let mut conn = setup();
        let mut introspector = SchemaIntrospector::new(&mut conn);
        assert!(!introspector.column_exists("rules", "clean_code_attribute").unwrap());
        assert!(introspector.column("issues", "kee").unwrap().is_none());
    }

    #[test]
    fn test_index_exists() {
        let mut conn = setup();
        let mut introspector = SchemaIntrospector::new(&mut conn);
        assert!(introspector.index_exists("rules", "rules_name").unwrap());
        assert!(!introspector.index_exists("rules", "rules_uuid").unwrap());
    }

    #[test]
    fn test_index_state() {
        let mut conn = setup();
        let mut introspector = SchemaIntrospector::new(&mut conn);
        assert_eq!(
            introspector.index_state("rules", "rules_name").unwrap(),
            IndexState::Valid
        );
        assert_eq!(
            introspector.index_state("rules", "rules_uuid").unwrap(),
            IndexState::Absent
        );
    }

    #[test]
    fn test_matches_expected_definition() {
        let mut conn = setup();
        let mut introspector = SchemaIntrospector::new(&mut conn);
        let name = introspector.column("rules", "name").unwrap().unwrap();

        assert!(name.matches(&ColumnDef::nullable("name", LogicalType::String(200))));
        assert!(!name.matches(&ColumnDef::new("name", LogicalType::String(200))));
        assert!(!name.matches(&ColumnDef::nullable("name", LogicalType::String(40))));
        assert_eq!(name.describe(), "STRING(200) NULL");
    }
}
