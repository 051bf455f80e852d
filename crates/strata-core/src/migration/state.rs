//! Executor state and run reports.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::step::{MigrationId, StepOutcome};

/// Lifecycle of a [`MigrationExecutor`](super::MigrationExecutor) run.
///
/// `Idle -> LedgerReady -> Running -> Done`, with any failure moving to
/// `Failed`. A finished executor may be run again; it restarts from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutorState {
    /// Not started.
    Idle,
    /// Ledger ensured, pending steps not yet computed.
    LedgerReady,
    /// Executing the pending step at `index`.
    Running {
        /// Position in the pending list.
        index: usize,
        /// Step being executed.
        id: MigrationId,
    },
    /// Every pending step succeeded.
    Done,
    /// A step or the ledger failed.
    Failed {
        /// Failing step, `None` if the ledger failed.
        id: Option<MigrationId>,
    },
}

impl ExecutorState {
    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        matches!(self, ExecutorState::LedgerReady | ExecutorState::Running { .. })
    }

    /// Whether the last run finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutorState::Done | ExecutorState::Failed { .. })
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorState::Idle => write!(f, "idle"),
            ExecutorState::LedgerReady => write!(f, "ledger ready"),
            ExecutorState::Running { id, .. } => write!(f, "running migration {id}"),
            ExecutorState::Done => write!(f, "done"),
            ExecutorState::Failed { id: Some(id) } => write!(f, "failed at migration {id}"),
            ExecutorState::Failed { id: None } => write!(f, "failed"),
        }
    }
}

/// One executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Step identifier.
    pub id: MigrationId,
    /// Step description.
    pub description: String,
    /// What the step did.
    pub outcome: StepOutcome,
    /// When the ledger entry was recorded.
    pub applied_at: DateTime<Utc>,
    /// Time spent in the step.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Statements issued by the step.
    pub statements: Vec<String>,
}

/// Result of a successful executor run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Final state.
    pub state: ExecutorState,
    /// Steps executed in this run, in order.
    pub applied: Vec<StepReport>,
    /// Pending steps skipped because the ledger already had them.
    pub skipped: Vec<MigrationId>,
    /// Steps that would run; filled only by dry runs.
    pub planned: Vec<MigrationId>,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Total run time.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl MigrationReport {
    /// Number of steps that issued DDL.
    pub fn applied_count(&self) -> usize {
        self.applied
            .iter()
            .filter(|s| s.outcome == StepOutcome::Applied)
            .count()
    }

    /// Number of steps whose target already existed.
    pub fn already_present_count(&self) -> usize {
        self.applied
            .iter()
            .filter(|s| s.outcome == StepOutcome::AlreadyPresent)
            .count()
    }

    /// Identifiers executed in this run, in order.
    pub fn executed_ids(&self) -> Vec<MigrationId> {
        self.applied.iter().map(|s| s.id).collect()
    }

    /// Whether nothing needed to run.
    pub fn is_up_to_date(&self) -> bool {
        self.applied.is_empty() && self.planned.is_empty()
    }
}

/// Ledger status of one registry step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStatus {
    /// Step identifier.
    pub id: MigrationId,
    /// Step description.
    pub description: String,
    /// Whether the ledger records the step.
    pub applied: bool,
}

/// Snapshot of registry versus ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Whether the ledger table exists.
    pub ledger_exists: bool,
    /// Every registry step with its ledger status.
    pub steps: Vec<StepStatus>,
    /// Highest identifier recorded in the ledger.
    pub highest_applied: Option<MigrationId>,
    /// Registry steps below `highest_applied` missing from the ledger.
    pub gaps: Vec<MigrationId>,
    /// Ledger identifiers the registry does not know.
    pub unknown: Vec<MigrationId>,
}

impl MigrationStatus {
    /// Steps the next run would execute: unrecorded and above the highest
    /// applied identifier. Unrecorded steps below it are listed in `gaps`.
    pub fn pending(&self) -> impl Iterator<Item = &StepStatus> {
        let highest = self.highest_applied;
        self.steps
            .iter()
            .filter(move |s| !s.applied && highest.map_or(true, |h| s.id > h))
    }

    /// Whether the next run would execute nothing.
    pub fn is_up_to_date(&self) -> bool {
        self.pending().next().is_none()
    }

    /// Whether `id` is a gap below the highest applied identifier.
    pub fn is_gap(&self, id: MigrationId) -> bool {
        self.gaps.contains(&id)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
