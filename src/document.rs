//! Schema document model
//!
//! A [`SchemaDocument`] is the versioned shape of one entity: metadata, an ordered
//! field list and composite indexes. Fields are matched across versions by their
//! [`FieldId`] only; names and columns are free to change.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{LogicalType, TypeResolver};

/// Stable identifier of a field, assigned once and never reused
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(String);

impl FieldId {
    /// Mint a fresh, time-ordered identifier
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id belongs to the fixed system field table
    pub fn is_system(&self) -> bool {
        self.0.starts_with(SYSTEM_FIELD_PREFIX)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FieldId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single field (column) of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub field_id: FieldId,
    pub field_name: String,
    pub column_name: String,
    pub logical_type: LogicalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub list_visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<String>,
    /// Synthesized by the assembler; read-only from UI and never renamed
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub auto_increment: bool,
}

impl FieldDef {
    /// A field carries a physical index when it is indexed or unique
    pub fn has_index(&self) -> bool {
        self.indexed || self.unique
    }

    /// Name of the single-column index backing `indexed`/`unique`
    pub fn index_name(&self) -> String {
        field_index_name(&self.column_name)
    }

    pub fn resolved_type(&self, resolver: &TypeResolver) -> String {
        resolver.resolve(self.logical_type, self.length, self.scale)
    }
}

pub fn field_index_name(column: &str) -> String {
    format!("idx_{column}")
}

/// Composite index declared on a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Same column list (in order) and same uniqueness
    pub fn same_definition(&self, other: &IndexDef) -> bool {
        self.columns == other.columns && self.unique == other.unique
    }
}

/// Versioned description of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub entity_name: String,
    pub table_name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Names of fields that must be supplied (non-nullable user fields)
    #[serde(default)]
    pub required: Vec<String>,
}

impl SchemaDocument {
    /// Editable fields, i.e. everything but the system columns
    pub fn user_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.system)
    }

    pub fn field_by_id(&self, id: &FieldId) -> Option<&FieldDef> {
        self.fields.iter().find(|f| &f.field_id == id)
    }

    pub fn column(&self, column_name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.column_name == column_name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }
}

// =============================================================================
// System fields
// =============================================================================

pub(crate) const SYSTEM_FIELD_PREFIX: &str = "sys_";

/// One row of the fixed system field table
#[derive(Debug, Clone, Copy)]
pub struct SystemField {
    pub field_id: &'static str,
    pub column_name: &'static str,
    pub field_name: &'static str,
    pub logical_type: LogicalType,
    pub length: Option<u32>,
    pub nullable: bool,
    pub default_value: Option<&'static str>,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub comment: &'static str,
}

pub const SYSTEM_FIELDS: [SystemField; 5] = [
    SystemField {
        field_id: "sys_id",
        column_name: "id",
        field_name: "id",
        logical_type: LogicalType::Long,
        length: None,
        nullable: false,
        default_value: None,
        primary_key: true,
        auto_increment: true,
        comment: "Primary key",
    },
    SystemField {
        field_id: "sys_created_by",
        column_name: "created_by",
        field_name: "createdBy",
        logical_type: LogicalType::String,
        length: Some(64),
        nullable: true,
        default_value: None,
        primary_key: false,
        auto_increment: false,
        comment: "Created by",
    },
    SystemField {
        field_id: "sys_created_at",
        column_name: "created_at",
        field_name: "createdAt",
        logical_type: LogicalType::Datetime,
        length: None,
        nullable: false,
        default_value: Some("CURRENT_TIMESTAMP"),
        primary_key: false,
        auto_increment: false,
        comment: "Created at",
    },
    SystemField {
        field_id: "sys_updated_by",
        column_name: "updated_by",
        field_name: "updatedBy",
        logical_type: LogicalType::String,
        length: Some(64),
        nullable: true,
        default_value: None,
        primary_key: false,
        auto_increment: false,
        comment: "Updated by",
    },
    SystemField {
        field_id: "sys_updated_at",
        column_name: "updated_at",
        field_name: "updatedAt",
        logical_type: LogicalType::Datetime,
        length: None,
        nullable: true,
        default_value: Some("CURRENT_TIMESTAMP"),
        primary_key: false,
        auto_increment: false,
        comment: "Updated at",
    },
];

impl SystemField {
    pub fn to_field(&self) -> FieldDef {
        FieldDef {
            field_id: FieldId::from(self.field_id),
            field_name: self.field_name.to_string(),
            column_name: self.column_name.to_string(),
            logical_type: self.logical_type,
            length: self.length,
            scale: None,
            nullable: self.nullable,
            default_value: self.default_value.map(String::from),
            comment: Some(self.comment.to_string()),
            indexed: false,
            unique: false,
            list_visible: false,
            widget: None,
            system: true,
            primary_key: self.primary_key,
            auto_increment: self.auto_increment,
        }
    }
}

pub fn is_system_column(column: &str) -> bool {
    SYSTEM_FIELDS
        .iter()
        .any(|f| f.column_name.eq_ignore_ascii_case(column))
}

fn default_true() -> bool {
    true
}
