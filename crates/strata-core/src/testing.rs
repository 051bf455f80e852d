//! Test helpers for migration steps.
//!
//! [`SchemaTester`] wraps a SQLite database with schema assertions.
//! [`ScriptedConnection`] and [`FaultInjector`] stand in for a database when a
//! test needs a dialect without a driver, or needs a statement to fail.

use crate::connection::{Connection, Row};
use crate::dialect::Dialect;
use crate::error::{DbError, DbErrorKind};

#[cfg(feature = "sqlite")]
pub use self::sqlite::SchemaTester;

#[cfg(feature = "sqlite")]
mod sqlite {
    use std::path::Path;

    use crate::connection::{Connection, SqliteConnection};
    use crate::dialect::LogicalType;
    use crate::introspect::SchemaIntrospector;
    use crate::migration::{MigrationContext, MigrationId, MigrationRegistry};

    /// SQLite database with schema assertions.
    ///
    /// Assertions panic with a descriptive message, like `assert!`.
    pub struct SchemaTester {
        conn: SqliteConnection,
    }

    impl SchemaTester {
        /// Fresh in-memory database.
        pub fn create_empty() -> Self {
            Self {
                conn: SqliteConnection::open_in_memory().expect("open in-memory sqlite"),
            }
        }

        /// Database file at `path`, created if missing.
        pub fn create_file(path: impl AsRef<Path>) -> Self {
            Self {
                conn: SqliteConnection::open(path).expect("open sqlite file"),
            }
        }

        /// Fresh database holding the schema as it was just before step `id`.
        ///
        /// Every registry step below `id` is executed; the ledger is not
        /// created.
        pub fn for_step(registry: &MigrationRegistry, id: MigrationId) -> Self {
            let mut tester = Self::create_empty();
            for step in registry.steps().iter().take_while(|s| s.id() < id) {
                let mut ctx = MigrationContext::new(&mut tester.conn);
                if let Err(err) = step.execute(&mut ctx) {
                    panic!("migration {} failed while preparing schema: {err}", step.id());
                }
            }
            tester
        }

        /// Underlying connection.
        pub fn conn(&mut self) -> &mut SqliteConnection {
            &mut self.conn
        }

        /// Execute a statement, panicking on failure.
        pub fn execute(&mut self, sql: &str) {
            if let Err(err) = self.conn.execute(sql) {
                panic!("statement failed: {sql}: {err}");
            }
        }

        /// Assert that `table` exists.
        pub fn assert_table_exists(&mut self, table: &str) {
            let exists = self.introspector().table_exists(table).expect("read catalog");
            assert!(exists, "table {table} does not exist");
        }

        /// Assert that `table` does not exist.
        pub fn assert_table_does_not_exist(&mut self, table: &str) {
            let exists = self.introspector().table_exists(table).expect("read catalog");
            assert!(!exists, "table {table} exists");
        }

        /// Assert that `table.column` does not exist.
        pub fn assert_column_does_not_exist(&mut self, table: &str, column: &str) {
            let exists = self
                .introspector()
                .column_exists(table, column)
                .expect("read catalog");
            assert!(!exists, "column {table}.{column} exists");
        }

        /// Assert the type and nullability of `table.column`.
        pub fn assert_column_definition(
            &mut self,
            table: &str,
            column: &str,
            expected_type: LogicalType,
            nullable: bool,
        ) {
            let Some(live) = self.introspector().column(table, column).expect("read catalog")
            else {
                panic!("column {table}.{column} does not exist");
            };
            assert_eq!(
                live.sql_type,
                Some(expected_type),
                "type of {table}.{column} is {}",
                live.raw_type
            );
            assert_eq!(live.nullable, nullable, "nullability of {table}.{column}");
        }

        /// Assert that index `index` exists on `table`.
        pub fn assert_index_exists(&mut self, table: &str, index: &str) {
            let exists = self
                .introspector()
                .index_exists(table, index)
                .expect("read catalog");
            assert!(exists, "index {index} on {table} does not exist");
        }

        /// Number of rows in `table`.
        pub fn count_rows_of_table(&mut self, table: &str) -> i64 {
            let rows = self
                .conn
                .query(&format!("SELECT COUNT(*) FROM {table}"))
                .expect("count rows");
            rows.first().and_then(|r| r.i64(0)).unwrap_or(0)
        }

        fn introspector(&mut self) -> SchemaIntrospector<'_> {
            SchemaIntrospector::new(&mut self.conn)
        }
    }
}

/// Statement failure injected by [`ScriptedConnection`] or [`FaultInjector`].
#[derive(Debug, Clone)]
struct Fault {
    pattern: String,
    kind: DbErrorKind,
    message: String,
    remaining: Option<usize>,
}

fn take_fault(faults: &mut [Fault], sql: &str) -> Option<DbError> {
    let fault = faults
        .iter_mut()
        .find(|f| f.remaining != Some(0) && sql.contains(&f.pattern))?;
    if let Some(remaining) = fault.remaining.as_mut() {
        *remaining -= 1;
    }
    Some(DbError::driver(fault.kind, fault.message.clone()))
}

/// Connection with canned query results and no database behind it.
///
/// Queries return the rows registered for the first pattern contained in the
/// SQL, or no rows. Statements succeed unless a fault matches.
#[derive(Debug)]
pub struct ScriptedConnection {
    dialect: Dialect,
    responses: Vec<(String, Vec<Row>)>,
    faults: Vec<Fault>,
    executed: Vec<String>,
    queries: Vec<String>,
}

impl ScriptedConnection {
    /// Connection speaking `dialect`.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            responses: Vec::new(),
            faults: Vec::new(),
            executed: Vec::new(),
            queries: Vec::new(),
        }
    }

    /// Answer queries containing `pattern` with `rows`.
    pub fn respond(mut self, pattern: impl Into<String>, rows: Vec<Row>) -> Self {
        self.responses.push((pattern.into(), rows));
        self
    }

    /// Fail statements containing `pattern`.
    pub fn fail_on(
        mut self,
        pattern: impl Into<String>,
        kind: DbErrorKind,
        message: impl Into<String>,
    ) -> Self {
        self.faults.push(Fault {
            pattern: pattern.into(),
            kind,
            message: message.into(),
            remaining: None,
        });
        self
    }

    /// Statements executed successfully.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Queries issued.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }
}

impl Connection for ScriptedConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        if let Some(err) = take_fault(&mut self.faults, sql) {
            return Err(err);
        }
        self.executed.push(sql.to_string());
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        self.queries.push(sql.to_string());
        if let Some(err) = take_fault(&mut self.faults, sql) {
            return Err(err);
        }
        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

/// Wraps a real connection and fails selected statements.
#[derive(Debug)]
pub struct FaultInjector<C> {
    inner: C,
    faults: Vec<Fault>,
    executed: Vec<String>,
}

impl<C: Connection> FaultInjector<C> {
    /// Wrap `inner`.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            faults: Vec::new(),
            executed: Vec::new(),
        }
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(&mut self, pattern: impl Into<String>, message: impl Into<String>) {
        self.faults.push(Fault {
            pattern: pattern.into(),
            kind: DbErrorKind::Other,
            message: message.into(),
            remaining: None,
        });
    }

    /// Fail the next statement containing `pattern` with `kind`, once.
    pub fn fail_once_on(
        &mut self,
        pattern: impl Into<String>,
        kind: DbErrorKind,
        message: impl Into<String>,
    ) {
        self.faults.push(Fault {
            pattern: pattern.into(),
            kind,
            message: message.into(),
            remaining: Some(1),
        });
    }

    /// Remove every fault.
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Statements executed successfully through the wrapper.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Wrapped connection.
    pub fn inner(&mut self) -> &mut C {
        &mut self.inner
    }
}

impl<C: Connection> Connection for FaultInjector<C> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        if let Some(err) = take_fault(&mut self.faults, sql) {
            return Err(err);
        }
        self.inner.execute(sql)?;
        self.executed.push(sql.to_string());
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        if let Some(err) = take_fault(&mut self.faults, sql) {
            return Err(err);
        }
        self.inner.query(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SqlValue;

    #[test]
    fn test_scripted_responses_and_faults() {
        let mut conn = ScriptedConnection::new(Dialect::PostgreSql)
            .respond("information_schema.tables", vec![Row(vec![SqlValue::Integer(1)])])
            .fail_on("DROP", DbErrorKind::Other, "not allowed");

        let rows = conn
            .query("SELECT COUNT(*) FROM information_schema.tables")
            .unwrap();
        assert_eq!(rows[0].i64(0), Some(1));
        assert!(conn.query("SELECT 1").unwrap().is_empty());

        conn.execute("CREATE TABLE t (a INTEGER NOT NULL)").unwrap();
        assert!(conn.execute("DROP TABLE t").is_err());
        assert_eq!(conn.executed().len(), 1);
        assert_eq!(conn.queries().len(), 2);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_fault_injector_fails_once() {
        let mut conn = FaultInjector::new(crate::connection::SqliteConnection::open_in_memory().unwrap());
        conn.fail_once_on("CREATE TABLE", DbErrorKind::AlreadyExists, "table exists");

        let err = conn.execute("CREATE TABLE t (a INTEGER)").unwrap_err();
        assert!(err.is_already_exists());
        conn.execute("CREATE TABLE t (a INTEGER)").unwrap();
        assert_eq!(conn.executed().len(), 1);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_schema_tester_assertions() {
        let mut db = SchemaTester::create_empty();
        db.execute("CREATE TABLE rules (uuid VARCHAR(40) NOT NULL, name VARCHAR(200))");
        db.execute("INSERT INTO rules (uuid) VALUES ('r1'), ('r2')");

        db.assert_table_exists("rules");
        db.assert_table_does_not_exist("issues");
        db.assert_column_does_not_exist("rules", "clean_code_attribute");
        db.assert_column_definition("rules", "uuid", crate::dialect::LogicalType::String(40), false);
        assert_eq!(db.count_rows_of_table("rules"), 2);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    #[should_panic(expected = "rules.uuid exists")]
    fn test_schema_tester_panics_on_present_column() {
        let mut db = SchemaTester::create_empty();
        db.execute("CREATE TABLE rules (uuid VARCHAR(40) NOT NULL)");
        db.assert_column_does_not_exist("rules", "uuid");
    }
}
