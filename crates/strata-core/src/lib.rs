//! Strata Core - forward-only, idempotent relational schema migrations.
//!
//! This crate brings a relational database schema to the latest version known
//! to the software, whatever version it starts from. It provides the dialect
//! adapter, database connections, schema introspection, the migration ledger,
//! the step registry and the executor.

pub mod builtin;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod introspect;
pub mod migration;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{connect, Connection, Row, SqlValue};
#[cfg(feature = "postgres")]
pub use connection::PgConnection;
#[cfg(feature = "sqlite")]
pub use connection::SqliteConnection;
pub use dialect::{Dialect, LogicalType};
pub use error::{DbError, DbErrorKind};
pub use introspect::{ColumnDefinition, IndexState, SchemaIntrospector};
pub use migration::{
    ExecutorState, HistoryEntry, LedgerConfig, MigrationConfig, MigrationError, MigrationExecutor,
    MigrationHistory, MigrationId, MigrationRegistry, MigrationReport, MigrationStatus,
    MigrationStep, StepOutcome,
};
