//! Ordered collection of migration steps.

use tracing::warn;

use super::error::MigrationError;
use super::step::{MigrationContext, MigrationId, MigrationStep, StepOutcome};

/// Immutable, strictly increasing list of migration steps.
///
/// The registry is validated on construction; once built it cannot be
/// reordered or edited, only iterated.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    steps: Vec<MigrationStep>,
}

impl MigrationRegistry {
    /// Build a registry from steps in declaration order.
    ///
    /// Fails with [`MigrationError::RegistryIntegrity`] if identifiers are
    /// duplicated or not strictly increasing.
    pub fn new(steps: Vec<MigrationStep>) -> Result<Self, MigrationError> {
        for pair in steps.windows(2) {
            let (previous, current) = (pair[0].id(), pair[1].id());
            if current <= previous {
                return Err(MigrationError::RegistryIntegrity { previous, current });
            }
        }
        Ok(Self { steps })
    }

    /// Start a registry builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// All steps in execution order.
    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Step with the given identifier.
    pub fn get(&self, id: MigrationId) -> Option<&MigrationStep> {
        self.steps
            .binary_search_by_key(&id, MigrationStep::id)
            .ok()
            .map(|i| &self.steps[i])
    }

    /// Whether `id` names a registered step.
    pub fn contains(&self, id: MigrationId) -> bool {
        self.get(id).is_some()
    }

    /// Steps with an identifier greater than `highest_applied`.
    pub fn pending(&self, highest_applied: Option<MigrationId>) -> &[MigrationStep] {
        match highest_applied {
            None => &self.steps,
            Some(highest) => {
                let start = self.steps.partition_point(|s| s.id() <= highest);
                &self.steps[start..]
            }
        }
    }

    /// Highest registered identifier.
    pub fn latest(&self) -> Option<MigrationId> {
        self.steps.last().map(MigrationStep::id)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the registry has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Fluent builder for [`MigrationRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    steps: Vec<MigrationStep>,
}

impl RegistryBuilder {
    /// Append a step.
    pub fn add<F>(mut self, id: u64, description: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut MigrationContext<'_>) -> Result<StepOutcome, MigrationError>
            + Send
            + Sync
            + 'static,
    {
        self.steps.push(MigrationStep::new(id, description, action));
        self
    }

    /// Append an already constructed step.
    pub fn step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<MigrationRegistry, MigrationError> {
        MigrationRegistry::new(self.steps).inspect_err(|err| {
            warn!(error = %err, "rejected migration registry");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut MigrationContext<'_>) -> Result<StepOutcome, MigrationError> {
        Ok(StepOutcome::AlreadyPresent)
    }

    fn registry(ids: &[u64]) -> Result<MigrationRegistry, MigrationError> {
        ids.iter()
            .fold(MigrationRegistry::builder(), |b, id| b.add(*id, format!("step {id}"), noop))
            .build()
    }

    #[test]
    fn test_strictly_increasing_ids() {
        let registry = registry(&[1, 2, 5, 10]).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.latest(), Some(MigrationId::new(10)));
        assert_eq!(registry.get(MigrationId::new(5)).unwrap().description(), "step 5");
        assert!(!registry.contains(MigrationId::new(3)));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = registry(&[1, 2, 2]).unwrap_err();
        match err {
            MigrationError::RegistryIntegrity { previous, current } => {
                assert_eq!(previous, MigrationId::new(2));
                assert_eq!(current, MigrationId::new(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_out_of_order_rejected() {
        assert!(matches!(
            registry(&[1, 3, 2]),
            Err(MigrationError::RegistryIntegrity { .. })
        ));
    }

    #[test]
    fn test_pending_after_highest_applied() {
        let registry = registry(&[1, 2, 3, 4]).unwrap();
        let ids = |steps: &[MigrationStep]| steps.iter().map(|s| s.id().value()).collect::<Vec<_>>();

        assert_eq!(ids(registry.pending(None)), vec![1, 2, 3, 4]);
        assert_eq!(ids(registry.pending(Some(MigrationId::new(2)))), vec![3, 4]);
        assert!(registry.pending(Some(MigrationId::new(4))).is_empty());
        // Ledger ahead of the registry (newer binary ran first).
        assert!(registry.pending(Some(MigrationId::new(99))).is_empty());
    }

    #[test]
    fn test_empty_registry() {
        let registry = registry(&[]).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.latest(), None);
        assert!(registry.pending(None).is_empty());
    }
}
