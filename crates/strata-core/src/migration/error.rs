//! Migration-specific error types.

use thiserror::Error;

use super::step::MigrationId;
use crate::dialect::Dialect;
use crate::error::DbError;

/// Migration-specific errors.
///
/// Every variant is fatal for the current run. None of them is retried by the
/// engine; the caller fixes the cause and re-runs the executor.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The ledger table cannot be created or read.
    #[error("migration ledger {table} unavailable: {source}")]
    LedgerUnavailable {
        /// Ledger table name.
        table: String,
        /// Underlying driver error.
        #[source]
        source: DbError,
    },

    /// The requested DDL has no safe translation for the active dialect.
    #[error("unsupported on {dialect}: {operation}")]
    UnsupportedDialectFeature {
        /// Active dialect.
        dialect: Dialect,
        /// The operation that cannot be expressed.
        operation: String,
    },

    /// The live schema diverges incompatibly from what a step expects.
    #[error("schema conflict on {table}.{column}: expected {expected}, found {actual}")]
    SchemaConflict {
        /// Table holding the conflicting object.
        table: String,
        /// Conflicting column (or index) name.
        column: String,
        /// Definition the step expects.
        expected: String,
        /// Definition found in the catalog.
        actual: String,
    },

    /// Registry identifiers are duplicated or out of order.
    #[error("registry integrity violated: migration {current} follows {previous}")]
    RegistryIntegrity {
        /// Identifier of the preceding step.
        previous: MigrationId,
        /// Identifier that is not strictly greater than `previous`.
        current: MigrationId,
    },

    /// A statement failed for a reason not covered above.
    #[error("statement failed: {sql}: {source}")]
    StepExecutionFailure {
        /// The failing statement.
        sql: String,
        /// Underlying driver error.
        #[source]
        source: DbError,
    },

    /// A migration step failed; wraps the cause with the offending identifier.
    #[error("migration {id} ({description}) failed: {source}")]
    StepFailed {
        /// Identifier of the failing step.
        id: MigrationId,
        /// Description of the failing step.
        description: String,
        /// Cause of the failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// The executor is already running.
    #[error("migration executor is already running")]
    AlreadyRunning,
}

impl MigrationError {
    /// Identifier of the first failing step, if the error came from a step.
    pub fn failed_step(&self) -> Option<MigrationId> {
        match self {
            MigrationError::StepFailed { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// The innermost migration error, skipping step wrappers.
    pub fn root_cause(&self) -> &MigrationError {
        match self {
            MigrationError::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self.root_cause() {
            MigrationError::LedgerUnavailable { .. } => "ledger_unavailable",
            MigrationError::UnsupportedDialectFeature { .. } => "unsupported_dialect_feature",
            MigrationError::SchemaConflict { .. } => "schema_conflict",
            MigrationError::RegistryIntegrity { .. } => "registry_integrity",
            MigrationError::StepExecutionFailure { .. } => "step_execution_failure",
            MigrationError::AlreadyRunning => "already_running",
            MigrationError::StepFailed { .. } => "step_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> MigrationError {
        MigrationError::SchemaConflict {
            table: "rules".to_string(),
            column: "clean_code_attribute".to_string(),
            expected: "STRING(40) NULL".to_string(),
            actual: "INTEGER NULL".to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = conflict();
        assert!(err.to_string().contains("rules.clean_code_attribute"));
        assert!(err.to_string().contains("expected STRING(40) NULL"));

        let err = MigrationError::UnsupportedDialectFeature {
            dialect: Dialect::H2,
            operation: "online create index".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported on h2: online create index");
    }

    #[test]
    fn test_step_failed_carries_identifier() {
        let err = MigrationError::StepFailed {
            id: MigrationId::new(2),
            description: "Add clean_code_attribute to rules".to_string(),
            source: Box::new(conflict()),
        };
        assert_eq!(err.failed_step(), Some(MigrationId::new(2)));
        assert!(matches!(err.root_cause(), MigrationError::SchemaConflict { .. }));
        assert_eq!(err.kind(), "schema_conflict");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_registry_error_has_no_step() {
        let err = MigrationError::RegistryIntegrity {
            previous: MigrationId::new(3),
            current: MigrationId::new(3),
        };
        assert_eq!(err.failed_step(), None);
        assert_eq!(err.kind(), "registry_integrity");
    }
}
