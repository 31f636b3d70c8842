//! Change executor
//!
//! Turns a change list into one [`MigrationUnit`] and hands it to a
//! [`RelationalStore`], which applies it all-or-nothing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::change::Change;
use crate::checksum::Checksum;
use crate::document::SchemaDocument;
use crate::error::{BoxError, Result, SchemaError};
use crate::migration::{primitives_for, MigrationUnit};
use crate::types::TypeResolver;

/// Result of handing a unit to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Applied,
    /// The unit id was already recorded; nothing ran
    AlreadyApplied,
}

/// Why a unit was rolled back
#[derive(Debug)]
pub struct PrimitiveFailure {
    /// Description of the failing primitive, or of the unit bookkeeping step
    pub primitive: String,
    pub source: BoxError,
}

impl PrimitiveFailure {
    pub fn new(primitive: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            primitive: primitive.into(),
            source: source.into(),
        }
    }
}

/// Target database for migration units.
///
/// Implementations must run every primitive of a unit inside one transaction,
/// in list order, and skip units whose id has already been applied.
pub trait RelationalStore: Send + Sync {
    fn apply_unit(&self, unit: &MigrationUnit) -> std::result::Result<UnitOutcome, PrimitiveFailure>;
}

/// What `apply` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Empty change list, store untouched
    NoChanges,
    Applied { unit_id: String, primitives: usize },
    AlreadyApplied { unit_id: String },
}

impl ApplyOutcome {
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            ApplyOutcome::NoChanges => None,
            ApplyOutcome::Applied { unit_id, .. } | ApplyOutcome::AlreadyApplied { unit_id } => {
                Some(unit_id)
            }
        }
    }
}

pub struct ChangeExecutor {
    store: Arc<dyn RelationalStore>,
    resolver: TypeResolver,
}

impl ChangeExecutor {
    pub fn new(store: Arc<dyn RelationalStore>, resolver: TypeResolver) -> Self {
        Self { store, resolver }
    }

    /// Build the migration unit for `changes` without running it
    pub fn plan(
        &self,
        unit_id: impl Into<String>,
        entity_name: &str,
        document: &SchemaDocument,
        changes: &[Change],
    ) -> MigrationUnit {
        let primitives = changes
            .iter()
            .flat_map(|change| primitives_for(change, document, &self.resolver))
            .collect();

        MigrationUnit {
            id: unit_id.into(),
            entity_name: entity_name.to_string(),
            table_name: document.table_name.clone(),
            checksum: Checksum::of_changes(changes),
            primitives,
        }
    }

    /// Apply `changes` under a freshly minted unit id
    pub fn apply(
        &self,
        entity_name: &str,
        document: &SchemaDocument,
        changes: &[Change],
    ) -> Result<ApplyOutcome> {
        self.apply_as(&MigrationUnit::new_id(entity_name), entity_name, document, changes)
    }

    /// Apply `changes` under a caller-chosen unit id; re-running a unit that
    /// already succeeded is a no-op
    pub fn apply_as(
        &self,
        unit_id: &str,
        entity_name: &str,
        document: &SchemaDocument,
        changes: &[Change],
    ) -> Result<ApplyOutcome> {
        if changes.is_empty() {
            debug!(entity = entity_name, "no changes to apply");
            return Ok(ApplyOutcome::NoChanges);
        }

        let unit = self.plan(unit_id, entity_name, document, changes);
        info!(
            entity = entity_name,
            unit = %unit.id,
            table = %unit.table_name,
            primitives = unit.primitives.len(),
            "applying migration unit"
        );

        match self.store.apply_unit(&unit) {
            Ok(UnitOutcome::Applied) => Ok(ApplyOutcome::Applied {
                unit_id: unit.id,
                primitives: unit.primitives.len(),
            }),
            Ok(UnitOutcome::AlreadyApplied) => {
                warn!(entity = entity_name, unit = %unit.id, "migration unit already applied, skipping");
                Ok(ApplyOutcome::AlreadyApplied { unit_id: unit.id })
            }
            Err(failure) => {
                warn!(
                    entity = entity_name,
                    unit = %unit.id,
                    primitive = %failure.primitive,
                    "migration unit rolled back"
                );
                Err(SchemaError::Migration {
                    entity: entity_name.to_string(),
                    unit_id: unit.id,
                    primitive: failure.primitive,
                    source: failure.source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        units: Mutex<Vec<MigrationUnit>>,
    }

    impl RelationalStore for RecordingStore {
        fn apply_unit(&self, unit: &MigrationUnit) -> std::result::Result<UnitOutcome, PrimitiveFailure> {
            let mut units = self.units.lock().unwrap();
            if units.iter().any(|u| u.id == unit.id) {
                return Ok(UnitOutcome::AlreadyApplied);
            }
            units.push(unit.clone());
            Ok(UnitOutcome::Applied)
        }
    }

    fn document() -> SchemaDocument {
        SchemaDocument {
            entity_name: "item".to_string(),
            table_name: "items".to_string(),
            label: String::new(),
            description: None,
            fields: vec![],
            indexes: vec![],
            required: vec![],
        }
    }

    #[test]
    fn test_empty_changes_touch_nothing() {
        let store = Arc::new(RecordingStore::default());
        let executor = ChangeExecutor::new(store.clone(), TypeResolver::new());

        let outcome = executor.apply("item", &document(), &[]).unwrap();
        assert_eq!(outcome, ApplyOutcome::NoChanges);
        assert!(store.units.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rerun_of_same_unit_is_noop() {
        let store = Arc::new(RecordingStore::default());
        let executor = ChangeExecutor::new(store.clone(), TypeResolver::new());
        let changes = vec![Change::DropColumn {
            column: "legacy".to_string(),
        }];

        let first = executor.apply_as("item-1", "item", &document(), &changes).unwrap();
        let second = executor.apply_as("item-1", "item", &document(), &changes).unwrap();

        assert!(matches!(first, ApplyOutcome::Applied { primitives: 1, .. }));
        assert_eq!(
            second,
            ApplyOutcome::AlreadyApplied {
                unit_id: "item-1".to_string()
            }
        );
        assert_eq!(store.units.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_plan_preserves_order() {
        let executor = ChangeExecutor::new(Arc::new(RecordingStore::default()), TypeResolver::new());
        let changes = vec![
            Change::DropIndex {
                name: "idx_a".to_string(),
            },
            Change::AddIndex {
                name: "idx_a".to_string(),
                columns: vec!["a".to_string()],
                unique: true,
            },
        ];

        let unit = executor.plan("item-2", "item", &document(), &changes);
        let ops: Vec<String> = unit.primitives.iter().map(ToString::to_string).collect();
        assert_eq!(
            ops,
            vec![
                "drop index idx_a on items".to_string(),
                "create unique index idx_a on items (a)".to_string(),
            ]
        );
        assert_eq!(unit.checksum, Checksum::of_changes(&changes));
    }
}
