//! Schema records and publish history in SQLite

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Database;
use crate::checksum::Checksum;
use crate::error::{Result, SchemaError};
use crate::store::{DocumentStore, HistoryEntry, PendingUnit, RecordFilter, SchemaRecord, SchemaStatus};

const RECORD_COLUMNS: &str =
    "id, entity_name, status, revision, document, pending_unit, created_at, updated_at";

/// [`DocumentStore`] backed by SQLite; documents are stored as JSON
pub struct SqliteDocumentStore {
    db: Database,
}

impl SqliteDocumentStore {
    /// Opens the store on `db`, creating its tables if needed
    pub fn new(db: Database) -> Result<Self> {
        let store = Self { db };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_documents (
                id TEXT PRIMARY KEY,
                entity_name TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('DRAFT', 'PUBLISHED')),
                revision INTEGER NOT NULL DEFAULT 0,
                document TEXT NOT NULL,
                pending_unit TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(entity_name, status)
            );

            CREATE TABLE IF NOT EXISTS schema_history (
                id TEXT PRIMARY KEY,
                record_id TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                revision INTEGER NOT NULL,
                document TEXT NOT NULL,
                checksum TEXT NOT NULL,
                summary TEXT NOT NULL,
                migration_id TEXT,
                published_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_schema_history_entity ON schema_history(entity_name);
            ",
        )?;
        Ok(())
    }

    fn query_records(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<SchemaRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn find_by_id(&self, id: &str) -> Result<Option<SchemaRecord>> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM schema_documents WHERE id = ?1"),
                params![id],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn find_by_name_and_status(
        &self,
        entity_name: &str,
        status: SchemaStatus,
    ) -> Result<Option<SchemaRecord>> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM schema_documents WHERE entity_name = ?1 AND status = ?2"
                ),
                params![entity_name, status.as_str()],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn save(&self, record: &SchemaRecord) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            &format!("INSERT INTO schema_documents ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                record.id,
                record.entity_name,
                record.status.as_str(),
                record.revision,
                serde_json::to_string(&record.document)?,
                pending_to_json(&record.pending_unit)?,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn update(&self, record: &SchemaRecord) -> Result<()> {
        let conn = self.db.lock()?;
        update_record(&conn, record)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.lock()?;
        let deleted = conn.execute("DELETE FROM schema_documents WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn list(&self, filter: &RecordFilter) -> Result<Vec<SchemaRecord>> {
        let records = self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM schema_documents ORDER BY entity_name, status"),
            &[],
        )?;
        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }

    fn commit_publish(
        &self,
        published: &SchemaRecord,
        consumed_draft: Option<&str>,
        entry: &HistoryEntry,
    ) -> Result<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        update_record(&tx, published)?;
        if let Some(draft_id) = consumed_draft {
            let deleted = tx.execute("DELETE FROM schema_documents WHERE id = ?1", params![draft_id])?;
            if deleted == 0 {
                return Err(SchemaError::not_found("Draft", draft_id));
            }
        }
        insert_history(&tx, entry)?;
        tx.commit()?;
        Ok(())
    }

    fn history(&self, entity_name: &str) -> Result<Vec<HistoryEntry>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, record_id, entity_name, revision, document, checksum, summary, migration_id, published_at
             FROM schema_history WHERE entity_name = ?1 ORDER BY revision, published_at",
        )?;
        let rows = stmt
            .query_map(params![entity_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, record_id, entity_name, revision, document, checksum, summary, migration_id, published_at)| {
                    Ok(HistoryEntry {
                        id,
                        record_id,
                        entity_name,
                        revision,
                        document: serde_json::from_str(&document)?,
                        checksum: Checksum::from(checksum),
                        summary,
                        migration_id,
                        published_at: parse_timestamp(&published_at)?,
                    })
                },
            )
            .collect()
    }
}

/// Row as read from SQLite, before JSON and timestamp decoding
struct RawRecord {
    id: String,
    entity_name: String,
    status: String,
    revision: u32,
    document: String,
    pending_unit: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_name: row.get(1)?,
            status: row.get(2)?,
            revision: row.get(3)?,
            document: row.get(4)?,
            pending_unit: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<SchemaRecord> {
        let status = self
            .status
            .parse::<SchemaStatus>()
            .map_err(SchemaError::Storage)?;
        let pending_unit = match self.pending_unit {
            Some(json) => Some(serde_json::from_str::<PendingUnit>(&json)?),
            None => None,
        };

        Ok(SchemaRecord {
            id: self.id,
            entity_name: self.entity_name,
            status,
            revision: self.revision,
            document: serde_json::from_str(&self.document)?,
            pending_unit,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn update_record(conn: &Connection, record: &SchemaRecord) -> Result<()> {
    let updated = conn.execute(
        "UPDATE schema_documents
         SET entity_name = ?2, status = ?3, revision = ?4, document = ?5,
             pending_unit = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            record.id,
            record.entity_name,
            record.status.as_str(),
            record.revision,
            serde_json::to_string(&record.document)?,
            pending_to_json(&record.pending_unit)?,
            record.updated_at.to_rfc3339(),
        ],
    )?;
    if updated == 0 {
        return Err(SchemaError::not_found("Schema record", record.id.clone()));
    }
    Ok(())
}

fn insert_history(conn: &Connection, entry: &HistoryEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_history
         (id, record_id, entity_name, revision, document, checksum, summary, migration_id, published_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.id,
            entry.record_id,
            entry.entity_name,
            entry.revision,
            serde_json::to_string(&entry.document)?,
            entry.checksum.as_str(),
            entry.summary,
            entry.migration_id,
            entry.published_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn pending_to_json(pending: &Option<PendingUnit>) -> Result<Option<String>> {
    Ok(match pending {
        Some(unit) => Some(serde_json::to_string(unit)?),
        None => None,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SchemaError::Storage(format!("invalid timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SchemaDocument;

    fn document(name: &str) -> SchemaDocument {
        SchemaDocument {
            entity_name: name.to_string(),
            table_name: format!("{name}s"),
            label: name.to_string(),
            description: None,
            fields: vec![],
            indexes: vec![],
            required: vec![],
        }
    }

    fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::new(Database::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_save_find_update_delete() {
        let store = store();
        let mut record = SchemaRecord::draft(document("order"));
        store.save(&record).unwrap();

        let found = store.find_by_id(&record.id).unwrap().unwrap();
        assert_eq!(found.document, record.document);
        assert_eq!(found.status, SchemaStatus::Draft);

        record.status = SchemaStatus::Published;
        record.revision = 1;
        record.pending_unit = Some(PendingUnit {
            unit_id: "order-1".to_string(),
            checksum: Checksum::from_bytes(b"x"),
        });
        store.update(&record).unwrap();

        let published = store
            .find_by_name_and_status("order", SchemaStatus::Published)
            .unwrap()
            .unwrap();
        assert_eq!(published.revision, 1);
        assert_eq!(published.pending_unit, record.pending_unit);
        assert!(store
            .find_by_name_and_status("order", SchemaStatus::Draft)
            .unwrap()
            .is_none());

        assert!(store.delete(&record.id).unwrap());
        assert!(!store.delete(&record.id).unwrap());
    }

    #[test]
    fn test_one_record_per_status() {
        let store = store();
        store.save(&SchemaRecord::draft(document("order"))).unwrap();
        assert!(store.save(&SchemaRecord::draft(document("order"))).is_err());
    }

    #[test]
    fn test_update_missing_record() {
        let store = store();
        let err = store.update(&SchemaRecord::draft(document("ghost"))).unwrap_err();
        assert!(matches!(err, SchemaError::NotFound { .. }));
    }

    #[test]
    fn test_list_and_exists() {
        let store = store();
        store.save(&SchemaRecord::draft(document("order"))).unwrap();
        store.save(&SchemaRecord::draft(document("customer"))).unwrap();

        assert_eq!(store.list(&RecordFilter::default()).unwrap().len(), 2);
        assert!(store.exists(&RecordFilter::entity("order")).unwrap());
        assert!(!store
            .exists(&RecordFilter::entity("order").with_status(SchemaStatus::Published))
            .unwrap());
    }

    #[test]
    fn test_history_is_ordered() {
        let store = store();
        for revision in [2u32, 1] {
            let entry = HistoryEntry {
                id: format!("h{revision}"),
                record_id: "r".to_string(),
                entity_name: "order".to_string(),
                revision,
                document: document("order"),
                checksum: Checksum::of_document(&document("order")),
                summary: "create table orders".to_string(),
                migration_id: None,
                published_at: Utc::now(),
            };
            insert_history(&store.db.lock().unwrap(), &entry).unwrap();
        }

        let history = store.history("order").unwrap();
        let revisions: Vec<u32> = history.iter().map(|h| h.revision).collect();
        assert_eq!(revisions, vec![1, 2]);
    }

    fn entry(record: &SchemaRecord, summary: &str) -> HistoryEntry {
        HistoryEntry {
            id: uuid::Uuid::now_v7().to_string(),
            record_id: record.id.clone(),
            entity_name: record.entity_name.clone(),
            revision: record.revision,
            document: record.document.clone(),
            checksum: Checksum::of_document(&record.document),
            summary: summary.to_string(),
            migration_id: None,
            published_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_publish_merges_and_consumes_draft() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteDocumentStore::new(db).unwrap();
        let mut published = SchemaRecord::draft(document("order"));
        published.status = SchemaStatus::Published;
        published.revision = 1;
        store.save(&published).unwrap();
        let draft = SchemaRecord::draft(document("order"));
        store.save(&draft).unwrap();

        published.revision = 2;
        store
            .commit_publish(&published, Some(&draft.id), &entry(&published, "add column note"))
            .unwrap();

        assert!(store.find_by_id(&draft.id).unwrap().is_none());
        assert_eq!(store.find_by_id(&published.id).unwrap().unwrap().revision, 2);
        assert_eq!(store.history("order").unwrap().len(), 1);
    }

    #[test]
    fn test_commit_publish_is_all_or_nothing() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteDocumentStore::new(db.clone()).unwrap();
        let mut draft = SchemaRecord::draft(document("order"));
        store.save(&draft).unwrap();

        db.with_connection(|c| {
            c.execute_batch(
                "CREATE TRIGGER reject_history BEFORE INSERT ON schema_history
                 BEGIN SELECT RAISE(ABORT, 'history unavailable'); END;",
            )
        })
        .unwrap();

        draft.status = SchemaStatus::Published;
        draft.revision = 1;
        assert!(store
            .commit_publish(&draft, None, &entry(&draft, "create table orders"))
            .is_err());

        let stored = store.find_by_id(&draft.id).unwrap().unwrap();
        assert_eq!(stored.status, SchemaStatus::Draft);
        assert_eq!(stored.revision, 0);
        assert!(store.history("order").unwrap().is_empty());
    }

    #[test]
    fn test_commit_publish_requires_the_consumed_draft() {
        let store = store();
        let mut published = SchemaRecord::draft(document("order"));
        published.status = SchemaStatus::Published;
        store.save(&published).unwrap();

        published.revision = 2;
        let err = store
            .commit_publish(&published, Some("gone"), &entry(&published, "x"))
            .unwrap_err();
        assert!(matches!(err, SchemaError::NotFound { .. }));
        assert_eq!(store.find_by_id(&published.id).unwrap().unwrap().revision, 0);
    }
}
