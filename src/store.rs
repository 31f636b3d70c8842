//! Document store contract
//!
//! Persists DRAFT and PUBLISHED schema records plus the append-only publish
//! history. At most one record per status exists for an entity name.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksum::Checksum;
use crate::document::SchemaDocument;
use crate::error::Result;

/// Lifecycle state of a schema record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaStatus {
    /// Editable, not applied
    Draft,
    /// Applied and queryable
    Published,
}

impl SchemaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaStatus::Draft => "DRAFT",
            SchemaStatus::Published => "PUBLISHED",
        }
    }
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(SchemaStatus::Draft),
            "PUBLISHED" => Ok(SchemaStatus::Published),
            other => Err(format!("unknown schema status '{other}'")),
        }
    }
}

/// Migration unit reserved by a publish attempt, reused when it is retried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUnit {
    pub unit_id: String,
    pub checksum: Checksum,
}

/// A stored schema document and its lifecycle metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: String,
    pub entity_name: String,
    pub status: SchemaStatus,
    /// Number of successful publishes folded into this record
    pub revision: u32,
    pub document: SchemaDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_unit: Option<PendingUnit>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SchemaRecord {
    /// New DRAFT record wrapping `document`
    pub fn draft(document: SchemaDocument) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            entity_name: document.entity_name.clone(),
            status: SchemaStatus::Draft,
            revision: 0,
            document,
            pending_unit: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.status == SchemaStatus::Draft
    }
}

/// Immutable snapshot written on every successful publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    /// Id of the PUBLISHED record the snapshot belongs to
    pub record_id: String,
    pub entity_name: String,
    pub revision: u32,
    pub document: SchemaDocument,
    pub checksum: Checksum,
    /// Human-readable change list
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Filter for listing records; empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub entity_name: Option<String>,
    pub status: Option<SchemaStatus>,
    /// Case-insensitive substring of the entity name
    pub name_contains: Option<String>,
}

impl RecordFilter {
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            entity_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: SchemaStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &SchemaRecord) -> bool {
        self.entity_name
            .as_ref()
            .map_or(true, |name| &record.entity_name == name)
            && self.status.map_or(true, |status| record.status == status)
            && self.name_contains.as_ref().map_or(true, |needle| {
                record
                    .entity_name
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            })
    }
}

/// Persistence for schema records and publish history
pub trait DocumentStore: Send + Sync {
    fn find_by_id(&self, id: &str) -> Result<Option<SchemaRecord>>;

    fn find_by_name_and_status(
        &self,
        entity_name: &str,
        status: SchemaStatus,
    ) -> Result<Option<SchemaRecord>>;

    /// Insert a new record
    fn save(&self, record: &SchemaRecord) -> Result<()>;

    /// Overwrite an existing record, matched by id
    fn update(&self, record: &SchemaRecord) -> Result<()>;

    /// Remove a record; returns whether it existed
    fn delete(&self, id: &str) -> Result<bool>;

    fn list(&self, filter: &RecordFilter) -> Result<Vec<SchemaRecord>>;

    fn exists(&self, filter: &RecordFilter) -> Result<bool> {
        Ok(!self.list(filter)?.is_empty())
    }

    /// Publish bookkeeping as one unit: overwrite `published` (a promoted draft
    /// or the merged PUBLISHED record), delete `consumed_draft` and append
    /// `entry`. Either all three persist or none does.
    fn commit_publish(
        &self,
        published: &SchemaRecord,
        consumed_draft: Option<&str>,
        entry: &HistoryEntry,
    ) -> Result<()>;

    /// History of an entity, oldest first
    fn history(&self, entity_name: &str) -> Result<Vec<HistoryEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: SchemaStatus) -> SchemaRecord {
        let mut record = SchemaRecord::draft(SchemaDocument {
            entity_name: name.to_string(),
            table_name: name.to_string(),
            label: String::new(),
            description: None,
            fields: vec![],
            indexes: vec![],
            required: vec![],
        });
        record.status = status;
        record
    }

    #[test]
    fn test_filter_matching() {
        let published = record("customer_order", SchemaStatus::Published);

        assert!(RecordFilter::default().matches(&published));
        assert!(RecordFilter::entity("customer_order").matches(&published));
        assert!(!RecordFilter::entity("customer_order")
            .with_status(SchemaStatus::Draft)
            .matches(&published));

        let contains = RecordFilter {
            name_contains: Some("ORDER".to_string()),
            ..RecordFilter::default()
        };
        assert!(contains.matches(&published));
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!("DRAFT".parse::<SchemaStatus>().unwrap(), SchemaStatus::Draft);
        assert_eq!(SchemaStatus::Published.to_string(), "PUBLISHED");
        assert!("ARCHIVED".parse::<SchemaStatus>().is_err());
    }
}
