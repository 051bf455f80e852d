//! Migration executor.
//!
//! Drives one run: ensure the ledger, compute the pending steps, execute them
//! in ascending order, record each success, stop at the first failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use super::error::MigrationError;
use super::history::{LedgerConfig, MigrationHistory};
use super::registry::MigrationRegistry;
use super::state::{ExecutorState, MigrationReport, MigrationStatus, StepReport, StepStatus};
use super::step::{MigrationContext, MigrationId, MigrationStep};
use crate::connection::Connection;

/// Executor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Ledger location.
    pub ledger: LedgerConfig,
    /// Report pending steps without executing them.
    pub dry_run: bool,
}

impl MigrationConfig {
    /// Set the ledger location.
    pub fn with_ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = ledger;
        self
    }

    /// Enable or disable dry runs.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Runs a [`MigrationRegistry`] against a database.
///
/// One executor drives one run at a time; a concurrent call to
/// [`execute`](Self::execute) fails with [`MigrationError::AlreadyRunning`].
/// Mutual exclusion between processes is the caller's concern.
pub struct MigrationExecutor {
    registry: MigrationRegistry,
    history: MigrationHistory,
    config: MigrationConfig,
    state: Mutex<ExecutorState>,
    running: AtomicBool,
}

impl MigrationExecutor {
    /// Create an executor with the default configuration.
    pub fn new(registry: MigrationRegistry) -> Self {
        Self::with_config(registry, MigrationConfig::default())
    }

    /// Create an executor with an explicit configuration.
    pub fn with_config(registry: MigrationRegistry, config: MigrationConfig) -> Self {
        Self {
            history: MigrationHistory::new(config.ledger.clone()),
            registry,
            config,
            state: Mutex::new(ExecutorState::Idle),
            running: AtomicBool::new(false),
        }
    }

    /// Registry being executed.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Ledger store.
    pub fn history(&self) -> &MigrationHistory {
        &self.history
    }

    /// Configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ExecutorState {
        *self.state.lock()
    }

    /// Bring the schema up to the latest registry step.
    ///
    /// On failure the error names the first failing step; the ledger holds
    /// every step before it, so a re-run resumes at that step.
    #[instrument(
        skip(self, conn),
        fields(dialect = %conn.dialect(), dry_run = self.config.dry_run)
    )]
    pub fn execute(&self, conn: &mut dyn Connection) -> Result<MigrationReport, MigrationError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let start = Instant::now();
        self.set_state(ExecutorState::Idle);

        info!(
            steps = self.registry.len(),
            ledger = %self.config.ledger.table,
            "Starting migration"
        );

        if let Err(err) = self.history.ensure_ledger_exists(conn) {
            error!(error = %err, "Migration ledger unavailable");
            self.set_state(ExecutorState::Failed { id: None });
            return Err(err);
        }
        self.set_state(ExecutorState::LedgerReady);

        let applied = match self.history.applied(conn) {
            Ok(applied) => applied,
            Err(err) => {
                error!(error = %err, "Failed to read migration ledger");
                self.set_state(ExecutorState::Failed { id: None });
                return Err(err);
            }
        };
        let highest = applied.last().copied();
        self.warn_inconsistencies(&applied);

        let pending = self.registry.pending(highest);
        let mut report = MigrationReport {
            state: ExecutorState::LedgerReady,
            applied: Vec::with_capacity(pending.len()),
            skipped: Vec::new(),
            planned: Vec::new(),
            dry_run: self.config.dry_run,
            duration: start.elapsed(),
        };

        if self.config.dry_run {
            report.planned = pending.iter().map(MigrationStep::id).collect();
            for step in pending {
                info!(id = %step.id(), description = step.description(), "Pending migration");
            }
        } else {
            for (index, step) in pending.iter().enumerate() {
                self.set_state(ExecutorState::Running {
                    index,
                    id: step.id(),
                });
                match self.run_step(conn, step) {
                    Ok(Some(step_report)) => report.applied.push(step_report),
                    Ok(None) => report.skipped.push(step.id()),
                    Err(err) => {
                        error!(
                            id = %step.id(),
                            description = step.description(),
                            error = %err,
                            "Migration failed"
                        );
                        self.set_state(ExecutorState::Failed { id: Some(step.id()) });
                        return Err(MigrationError::StepFailed {
                            id: step.id(),
                            description: step.description().to_string(),
                            source: Box::new(err),
                        });
                    }
                }
            }
        }

        self.set_state(ExecutorState::Done);
        report.state = ExecutorState::Done;
        report.duration = start.elapsed();

        info!(
            applied = report.applied_count(),
            already_present = report.already_present_count(),
            skipped = report.skipped.len(),
            planned = report.planned.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Migration completed"
        );
        Ok(report)
    }

    /// Registry steps with their ledger status. Does not create the ledger.
    #[instrument(skip(self, conn), fields(dialect = %conn.dialect()))]
    pub fn status(&self, conn: &mut dyn Connection) -> Result<MigrationStatus, MigrationError> {
        let ledger_exists = self.history.ledger_exists(conn)?;
        let applied = if ledger_exists {
            self.history.applied(conn)?
        } else {
            Vec::new()
        };
        let (gaps, unknown) = self.warn_inconsistencies(&applied);

        let steps = self
            .registry
            .steps()
            .iter()
            .map(|step| StepStatus {
                id: step.id(),
                description: step.description().to_string(),
                applied: applied.binary_search(&step.id()).is_ok(),
            })
            .collect();

        Ok(MigrationStatus {
            ledger_exists,
            steps,
            highest_applied: applied.last().copied(),
            gaps,
            unknown,
        })
    }

    /// Execute one step unless the ledger already has it.
    ///
    /// Returns `None` when the step was skipped.
    fn run_step(
        &self,
        conn: &mut dyn Connection,
        step: &MigrationStep,
    ) -> Result<Option<StepReport>, MigrationError> {
        let id = step.id();
        if self.history.is_applied(conn, id)? {
            info!(id = %id, description = step.description(), "Skipping applied migration");
            return Ok(None);
        }

        info!(id = %id, description = step.description(), "Applying migration");
        let start = Instant::now();
        let (outcome, statements) = {
            let mut ctx = MigrationContext::new(&mut *conn);
            let outcome = step.execute(&mut ctx)?;
            (outcome, ctx.take_statements())
        };
        let entry = self.history.record_applied(conn, id)?;
        let duration = start.elapsed();

        info!(
            id = %id,
            outcome = %outcome,
            statements = statements.len(),
            duration_ms = duration.as_millis() as u64,
            "Migration applied"
        );

        Ok(Some(StepReport {
            id,
            description: step.description().to_string(),
            outcome,
            applied_at: entry.applied_at,
            duration,
            statements,
        }))
    }

    /// Log ledger gaps and unknown ledger rows; returns both lists.
    fn warn_inconsistencies(
        &self,
        applied: &[MigrationId],
    ) -> (Vec<MigrationId>, Vec<MigrationId>) {
        let Some(highest) = applied.last().copied() else {
            return (Vec::new(), Vec::new());
        };

        let gaps: Vec<MigrationId> = self
            .registry
            .steps()
            .iter()
            .map(MigrationStep::id)
            .filter(|id| *id < highest && applied.binary_search(id).is_err())
            .collect();
        for id in &gaps {
            warn!(
                id = %id,
                highest = %highest,
                "Migration missing from ledger below highest applied"
            );
        }

        let unknown: Vec<MigrationId> = applied
            .iter()
            .copied()
            .filter(|id| !self.registry.contains(*id))
            .collect();
        for id in &unknown {
            warn!(id = %id, "Ledger records an unknown migration");
        }

        if gaps.is_empty() && unknown.is_empty() {
            debug!(highest = %highest, applied = applied.len(), "Ledger consistent");
        }
        (gaps, unknown)
    }

    fn set_state(&self, state: ExecutorState) {
        *self.state.lock() = state;
    }
}

impl std::fmt::Debug for MigrationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationExecutor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Marks the executor busy for the duration of a run.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, MigrationError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MigrationError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
