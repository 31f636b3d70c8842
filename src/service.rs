//! Schema service: draft editing and the publish workflow
//!
//! `publish` runs detect, apply, promote, record history and cache
//! invalidation for one draft. The physical migration is the only step that
//! can fail on the target database; everything after it is bookkeeping in the
//! document store, written in one `commit_publish` call once the migration unit
//! has committed.
//!
//! Publishes of the same entity are serialized by an in-process lock. Several
//! processes publishing the same entity against one database must still be
//! serialized by the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assembler::{assemble, DraftRequest};
use crate::cache::SchemaCache;
use crate::change::{summarize, Change};
use crate::checksum::Checksum;
use crate::config::ForgeConfig;
use crate::detector::ChangeDetector;
use crate::document::SchemaDocument;
use crate::error::{Result, SchemaError};
use crate::executor::{ChangeExecutor, RelationalStore};
use crate::migration::{MigrationPrimitive, MigrationUnit};
use crate::sqlite::{Database, SqliteDocumentStore, SqliteRelationalStore};
use crate::store::{
    DocumentStore, HistoryEntry, PendingUnit, RecordFilter, SchemaRecord, SchemaStatus,
};
use crate::types::TypeResolver;

/// Result of a successful publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    /// The PUBLISHED record after the publish
    pub record: SchemaRecord,
    pub changes: Vec<Change>,
    /// Migration unit that carried the changes; `None` when there were none
    pub migration_id: Option<String>,
}

/// What publishing a draft would do, without doing it
#[derive(Debug, Clone, Serialize)]
pub struct PublishPreview {
    pub entity_name: String,
    pub changes: Vec<Change>,
    pub primitives: Vec<MigrationPrimitive>,
    pub summary: String,
}

pub struct SchemaService {
    documents: Arc<dyn DocumentStore>,
    detector: ChangeDetector,
    executor: ChangeExecutor,
    cache: SchemaCache,
    publish_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SchemaService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        relational: Arc<dyn RelationalStore>,
        resolver: TypeResolver,
    ) -> Self {
        Self {
            documents,
            detector: ChangeDetector::new(resolver.clone()),
            executor: ChangeExecutor::new(relational, resolver),
            cache: SchemaCache::new(),
            publish_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Service whose entity tables and schema records share one SQLite database
    pub fn with_database(db: Database, ledger_table: &str, resolver: TypeResolver) -> Result<Self> {
        let documents = SqliteDocumentStore::new(db.clone())?;
        let relational = SqliteRelationalStore::with_ledger_table(db, ledger_table)?;
        Ok(Self::new(Arc::new(documents), Arc::new(relational), resolver))
    }

    /// Open the database named by `config`
    pub fn open(config: &ForgeConfig) -> Result<Self> {
        let db = Database::open(config.database_path())?;
        Self::with_database(db, &config.migration.ledger_table, config.resolver()?)
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Assemble and store a new DRAFT; an entity has at most one draft
    pub fn create_draft(&self, request: &DraftRequest) -> Result<SchemaRecord> {
        let document = assemble(request)?;
        if let Some(existing) = self
            .documents
            .find_by_name_and_status(&document.entity_name, SchemaStatus::Draft)?
        {
            return Err(SchemaError::InvalidState(format!(
                "entity '{}' already has draft {}",
                document.entity_name, existing.id
            )));
        }

        let record = SchemaRecord::draft(document);
        self.documents.save(&record)?;
        info!(entity = %record.entity_name, draft = %record.id, "created draft");
        Ok(record)
    }

    /// Replace the document of a DRAFT with a re-assembled one
    pub fn update_draft(&self, draft_id: &str, request: &DraftRequest) -> Result<SchemaRecord> {
        let mut record = self.get_draft(draft_id)?;
        let document = assemble(request)?;
        if document.entity_name != record.entity_name {
            return Err(SchemaError::invalid(format!(
                "draft {} belongs to entity '{}', not '{}'",
                draft_id, record.entity_name, document.entity_name
            )));
        }

        record.document = document;
        record.updated_at = Utc::now();
        self.documents.update(&record)?;
        Ok(record)
    }

    /// Open a DRAFT seeded with the published document, keeping its field ids
    pub fn draft_from_published(&self, entity_name: &str) -> Result<SchemaRecord> {
        let published = self
            .documents
            .find_by_name_and_status(entity_name, SchemaStatus::Published)?
            .ok_or_else(|| SchemaError::not_found("Published schema", entity_name))?;
        if let Some(existing) = self
            .documents
            .find_by_name_and_status(entity_name, SchemaStatus::Draft)?
        {
            return Err(SchemaError::InvalidState(format!(
                "entity '{}' already has draft {}",
                entity_name, existing.id
            )));
        }

        let record = SchemaRecord::draft(published.document);
        self.documents.save(&record)?;
        Ok(record)
    }

    pub fn get_draft(&self, draft_id: &str) -> Result<SchemaRecord> {
        match self.documents.find_by_id(draft_id)? {
            Some(record) if record.is_draft() => Ok(record),
            Some(record) => Err(SchemaError::InvalidState(format!(
                "schema {} of entity '{}' is {}",
                draft_id, record.entity_name, record.status
            ))),
            None => Err(SchemaError::not_found("Draft", draft_id)),
        }
    }

    /// Remove a DRAFT record. PUBLISHED records own a live table and cannot be
    /// deleted.
    pub fn delete_schema(&self, id: &str) -> Result<()> {
        let record = self
            .documents
            .find_by_id(id)?
            .ok_or_else(|| SchemaError::not_found("Schema", id))?;
        if !record.is_draft() {
            return Err(SchemaError::InvalidState(format!(
                "schema {} of entity '{}' is {} and backs table '{}'",
                id, record.entity_name, record.status, record.document.table_name
            )));
        }

        self.documents.delete(id)?;
        self.cache.invalidate(&record.entity_name);
        info!(entity = %record.entity_name, id, status = %record.status, "deleted schema");
        Ok(())
    }

    /// The change list and primitives `publish(draft_id)` would apply right now
    pub fn preview(&self, draft_id: &str) -> Result<PublishPreview> {
        let draft = self.get_draft(draft_id)?;
        let base = self.published_base(&draft)?;
        let changes = self
            .detector
            .detect_changes(&draft.document, base.as_ref().map(|r| &r.document));
        let unit = self
            .executor
            .plan("preview", &draft.entity_name, &draft.document, &changes);

        Ok(PublishPreview {
            entity_name: draft.entity_name,
            summary: summarize(&changes),
            changes,
            primitives: unit.primitives,
        })
    }

    /// Apply a draft to the relational store and make it the published schema.
    ///
    /// On failure the draft stays DRAFT, no history is written and the
    /// migration unit is rolled back; the draft can be published again. If the
    /// unit committed but the bookkeeping did not, a retry reuses the unit.
    pub fn publish(&self, draft_id: &str) -> Result<PublishOutcome> {
        let entity_name = self.get_draft(draft_id)?.entity_name;
        let lock = self.publish_lock(&entity_name);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        // Re-read under the lock; a concurrent publish may have consumed it.
        let mut draft = self.get_draft(draft_id)?;
        let base = self.published_base(&draft)?;
        let changes = self
            .detector
            .detect_changes(&draft.document, base.as_ref().map(|r| &r.document));
        info!(entity = %entity_name, draft = draft_id, changes = changes.len(), "publishing schema");

        let migration_id = if changes.is_empty() {
            None
        } else {
            let unit_id = self.reserve_unit(&mut draft, &changes)?;
            let applied = self
                .executor
                .apply_as(&unit_id, &entity_name, &draft.document, &changes)
                .map_err(|e| {
                    warn!(entity = %entity_name, draft = draft_id, error = %e, "publish failed");
                    e
                })?;
            applied.unit_id().map(str::to_string)
        };

        let now = Utc::now();
        let (published, consumed_draft) = match base {
            Some(mut base) => {
                base.document = draft.document;
                base.revision += 1;
                base.pending_unit = None;
                base.updated_at = now;
                (base, Some(draft.id))
            }
            None => {
                draft.status = SchemaStatus::Published;
                draft.revision = 1;
                draft.pending_unit = None;
                draft.updated_at = now;
                (draft, None)
            }
        };

        let entry = HistoryEntry {
            id: Uuid::now_v7().to_string(),
            record_id: published.id.clone(),
            entity_name: entity_name.clone(),
            revision: published.revision,
            document: published.document.clone(),
            checksum: Checksum::of_document(&published.document),
            summary: summarize(&changes),
            migration_id: migration_id.clone(),
            published_at: now,
        };
        self.documents
            .commit_publish(&published, consumed_draft.as_deref(), &entry)
            .map_err(|e| {
                warn!(entity = %entity_name, draft = draft_id, error = %e, "publish bookkeeping failed");
                e
            })?;
        self.cache.invalidate(&entity_name);

        info!(
            entity = %entity_name,
            revision = published.revision,
            migration = migration_id.as_deref().unwrap_or("-"),
            "published schema"
        );
        Ok(PublishOutcome {
            record: published,
            changes,
            migration_id,
        })
    }

    /// Published document for `entity_name`, served from the cache
    pub fn get_published_document(&self, entity_name: &str) -> Result<Arc<SchemaDocument>> {
        self.cache
            .get_or_load(entity_name, || {
                Ok(self
                    .documents
                    .find_by_name_and_status(entity_name, SchemaStatus::Published)?
                    .map(|record| record.document))
            })?
            .ok_or_else(|| SchemaError::not_found("Published schema", entity_name))
    }

    pub fn list(&self, filter: &RecordFilter) -> Result<Vec<SchemaRecord>> {
        self.documents.list(filter)
    }

    /// Publish history of `entity_name`, oldest first
    pub fn history(&self, entity_name: &str) -> Result<Vec<HistoryEntry>> {
        self.documents.history(entity_name)
    }

    /// Current PUBLISHED record for the draft's entity; the table name is fixed
    /// once published
    fn published_base(&self, draft: &SchemaRecord) -> Result<Option<SchemaRecord>> {
        let base = self
            .documents
            .find_by_name_and_status(&draft.entity_name, SchemaStatus::Published)?;
        if let Some(base) = &base {
            if base.document.table_name != draft.document.table_name {
                return Err(SchemaError::invalid(format!(
                    "entity '{}' is published as table '{}'; cannot move it to '{}'",
                    draft.entity_name, base.document.table_name, draft.document.table_name
                )));
            }
        }
        Ok(base)
    }

    /// Unit id for this change list: the one already reserved on the draft when
    /// the changes are unchanged, else a new one persisted before use
    fn reserve_unit(&self, draft: &mut SchemaRecord, changes: &[Change]) -> Result<String> {
        let checksum = Checksum::of_changes(changes);
        if let Some(pending) = &draft.pending_unit {
            if pending.checksum == checksum {
                return Ok(pending.unit_id.clone());
            }
        }

        let unit_id = MigrationUnit::new_id(&draft.entity_name);
        draft.pending_unit = Some(PendingUnit {
            unit_id: unit_id.clone(),
            checksum,
        });
        draft.updated_at = Utc::now();
        self.documents.update(draft)?;
        Ok(unit_id)
    }

    fn publish_lock(&self, entity_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.publish_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(entity_name.to_string()).or_default())
    }
}
