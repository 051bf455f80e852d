//! Migration steps: the unit of schema change.
//!
//! A step is a data record: identifier, description, and an action closure
//! implementing the three-way idempotency branch (absent / present-and-correct
//! / present-and-wrong). Steps hold no state of their own; their memory is the
//! live schema plus the ledger.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use tracing::debug;

use super::error::MigrationError;
use crate::connection::Connection;
use crate::dialect::ddl::Ddl;
use crate::dialect::Dialect;
use crate::introspect::SchemaIntrospector;

/// Totally ordered identifier of a migration step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct MigrationId(u64);

impl MigrationId {
    /// Create an identifier.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MigrationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u64> for MigrationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// What a step did when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step issued DDL to reach its target state.
    Applied,
    /// The target state already existed; nothing was issued.
    AlreadyPresent,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Applied => write!(f, "applied"),
            StepOutcome::AlreadyPresent => write!(f, "already present"),
        }
    }
}

/// Action run by a step.
pub type StepAction =
    Box<dyn Fn(&mut MigrationContext<'_>) -> Result<StepOutcome, MigrationError> + Send + Sync>;

/// A versioned, idempotent, single-purpose schema change.
pub struct MigrationStep {
    id: MigrationId,
    description: String,
    action: StepAction,
}

impl MigrationStep {
    /// Create a step from an action closure.
    pub fn new<F>(id: impl Into<MigrationId>, description: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut MigrationContext<'_>) -> Result<StepOutcome, MigrationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            action: Box::new(action),
        }
    }

    /// Step identifier.
    pub fn id(&self) -> MigrationId {
        self.id
    }

    /// Step description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the step.
    ///
    /// Safe to call whatever the starting state: absent, partially applied by
    /// a crashed run, or already present.
    pub fn execute(&self, ctx: &mut MigrationContext<'_>) -> Result<StepOutcome, MigrationError> {
        (self.action)(ctx)
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Execution context handed to a step: introspection plus DDL execution.
pub struct MigrationContext<'a> {
    conn: &'a mut dyn Connection,
    dialect: Dialect,
    statements: Vec<String>,
}

impl<'a> MigrationContext<'a> {
    /// Create a context on `conn`.
    pub fn new(conn: &'a mut dyn Connection) -> Self {
        let dialect = conn.dialect();
        Self {
            conn,
            dialect,
            statements: Vec::new(),
        }
    }

    /// Active dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Catalog reader on the same connection.
    pub fn introspector(&mut self) -> SchemaIntrospector<'_> {
        SchemaIntrospector::new(&mut *self.conn)
    }

    /// Render `ddl` for the active dialect without executing it.
    pub fn render(&self, ddl: &dyn Ddl) -> Result<Vec<String>, MigrationError> {
        ddl.render(self.dialect)
    }

    /// Render and execute `ddl`.
    pub fn apply(&mut self, ddl: &dyn Ddl) -> Result<(), MigrationError> {
        for sql in ddl.render(self.dialect)? {
            self.execute(&sql)?;
        }
        Ok(())
    }

    /// Execute a raw statement.
    pub fn execute(&mut self, sql: &str) -> Result<(), MigrationError> {
        let start = Instant::now();
        self.conn
            .execute(sql)
            .map_err(|source| MigrationError::StepExecutionFailure {
                sql: sql.to_string(),
                source,
            })?;
        debug!(
            dialect = %self.dialect,
            sql,
            duration_ms = start.elapsed().as_millis() as u64,
            "executed statement"
        );
        self.statements.push(sql.to_string());
        Ok(())
    }

    /// Statements executed through this context so far.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Take the executed statements, leaving the list empty.
    pub fn take_statements(&mut self) -> Vec<String> {
        std::mem::take(&mut self.statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_id_ordering_is_numeric() {
        assert!(MigrationId::new(9) < MigrationId::new(10));
        assert_eq!("102".parse::<MigrationId>().unwrap(), MigrationId::new(102));
        assert_eq!(" 7 ".parse::<MigrationId>().unwrap(), MigrationId::new(7));
        assert!("v7".parse::<MigrationId>().is_err());
        assert_eq!(MigrationId::new(42).to_string(), "42");
    }

    #[test]
    fn test_step_debug_hides_action() {
        let step = MigrationStep::new(1, "noop", |_| Ok(StepOutcome::AlreadyPresent));
        let debug = format!("{step:?}");
        assert!(debug.contains("noop"));
        assert_eq!(step.id(), MigrationId::new(1));
        assert_eq!(step.description(), "noop");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_context_records_statements() {
        use crate::connection::SqliteConnection;

        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut ctx = MigrationContext::new(&mut conn);
        assert_eq!(ctx.dialect(), Dialect::Sqlite);

        ctx.execute("CREATE TABLE rules (uuid VARCHAR(40) NOT NULL)").unwrap();
        assert_eq!(ctx.statements().len(), 1);
        assert!(ctx.introspector().table_exists("rules").unwrap());

        let err = ctx.execute("CREATE TABLE rules (uuid VARCHAR(40) NOT NULL)").unwrap_err();
        assert!(matches!(err, MigrationError::StepExecutionFailure { .. }));
        assert_eq!(ctx.take_statements().len(), 1);
        assert!(ctx.statements().is_empty());
    }
}
