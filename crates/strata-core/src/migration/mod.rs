//! Forward-only schema migration engine.
//!
//! This module brings a database schema from whatever version it is at to the
//! latest known version:
//! - Steps are idempotent: each inspects the live schema before changing it
//! - Steps run once, in ascending identifier order
//! - A durable ledger records each completed step
//! - The first failure halts the run; a re-run resumes at the failed step
//!
//! There are no down migrations. Recovery is always "fix the cause, run again".
//!
//! # Step shape
//!
//! | Live schema | Step behavior |
//! |-------------|---------------|
//! | target absent | issue DDL, report `Applied` |
//! | target present and as expected | no DDL, report `AlreadyPresent` |
//! | target present but different | fail with `SchemaConflict` |
//!
//! # Example
//!
//! ```no_run
//! use strata_core::connection::SqliteConnection;
//! use strata_core::dialect::{AddColumn, ColumnDef, LogicalType};
//! use strata_core::migration::{actions, MigrationExecutor, MigrationRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = MigrationRegistry::builder()
//!     .add(1, "Add clean_code_attribute to rules", |ctx| {
//!         actions::add_column(
//!             ctx,
//!             &AddColumn::new(
//!                 "rules",
//!                 ColumnDef::nullable("clean_code_attribute", LogicalType::String(40)),
//!             ),
//!         )
//!     })
//!     .build()?;
//!
//! let mut conn = SqliteConnection::open("strata.db")?;
//! let report = MigrationExecutor::new(registry).execute(&mut conn)?;
//! println!("{} migrations applied", report.applied_count());
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod error;
pub mod executor;
pub mod history;
pub mod registry;
pub mod state;
pub mod step;

pub use error::MigrationError;
pub use executor::{MigrationConfig, MigrationExecutor};
pub use history::{HistoryEntry, LedgerConfig, MigrationHistory};
pub use registry::{MigrationRegistry, RegistryBuilder};
pub use state::{ExecutorState, MigrationReport, MigrationStatus, StepReport, StepStatus};
pub use step::{MigrationContext, MigrationId, MigrationStep, StepAction, StepOutcome};
