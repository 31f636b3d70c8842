//! Physical migration primitives and the change-to-primitive mapping

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::change::Change;
use crate::checksum::Checksum;
use crate::document::{FieldDef, SchemaDocument};
use crate::types::TypeResolver;

/// Column definition used by `CREATE TABLE` and `ADD COLUMN`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnSpec {
    pub fn from_field(field: &FieldDef, resolver: &TypeResolver) -> Self {
        Self {
            name: field.column_name.clone(),
            column_type: field.resolved_type(resolver),
            nullable: field.nullable && !field.primary_key,
            default_value: field
                .default_value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from),
            primary_key: field.primary_key,
            auto_increment: field.auto_increment,
            comment: field.comment.clone(),
        }
    }
}

/// A single DDL step against one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationPrimitive {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        old_column: String,
        new_column: String,
        column_type: String,
    },
    AlterColumnType {
        table: String,
        column: String,
        new_type: String,
    },
    AddNotNull {
        table: String,
        column: String,
        column_type: String,
    },
    DropNotNull {
        table: String,
        column: String,
        column_type: String,
    },
    AddDefault {
        table: String,
        column: String,
        column_type: String,
        value: String,
    },
    DropDefault {
        table: String,
        column: String,
    },
    CreateIndex {
        table: String,
        name: String,
        columns: Vec<String>,
        unique: bool,
    },
    DropIndex {
        table: String,
        name: String,
    },
}

impl MigrationPrimitive {
    pub fn table(&self) -> &str {
        match self {
            MigrationPrimitive::CreateTable { table, .. }
            | MigrationPrimitive::AddColumn { table, .. }
            | MigrationPrimitive::DropColumn { table, .. }
            | MigrationPrimitive::RenameColumn { table, .. }
            | MigrationPrimitive::AlterColumnType { table, .. }
            | MigrationPrimitive::AddNotNull { table, .. }
            | MigrationPrimitive::DropNotNull { table, .. }
            | MigrationPrimitive::AddDefault { table, .. }
            | MigrationPrimitive::DropDefault { table, .. }
            | MigrationPrimitive::CreateIndex { table, .. }
            | MigrationPrimitive::DropIndex { table, .. } => table,
        }
    }
}

impl fmt::Display for MigrationPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationPrimitive::CreateTable { table, columns } => {
                write!(f, "create table {table} ({} columns)", columns.len())
            }
            MigrationPrimitive::AddColumn { table, column } => {
                write!(f, "add column {}.{} {}", table, column.name, column.column_type)
            }
            MigrationPrimitive::DropColumn { table, column } => {
                write!(f, "drop column {table}.{column}")
            }
            MigrationPrimitive::RenameColumn {
                table,
                old_column,
                new_column,
                ..
            } => write!(f, "rename column {table}.{old_column} to {new_column}"),
            MigrationPrimitive::AlterColumnType {
                table,
                column,
                new_type,
            } => write!(f, "alter type of {table}.{column} to {new_type}"),
            MigrationPrimitive::AddNotNull { table, column, .. } => {
                write!(f, "add not-null constraint on {table}.{column}")
            }
            MigrationPrimitive::DropNotNull { table, column, .. } => {
                write!(f, "drop not-null constraint on {table}.{column}")
            }
            MigrationPrimitive::AddDefault {
                table,
                column,
                value,
                ..
            } => write!(f, "set default of {table}.{column} to {value}"),
            MigrationPrimitive::DropDefault { table, column } => {
                write!(f, "drop default of {table}.{column}")
            }
            MigrationPrimitive::CreateIndex {
                table,
                name,
                columns,
                unique,
            } => {
                let kind = if *unique { "unique index" } else { "index" };
                write!(f, "create {kind} {name} on {table} ({})", columns.join(", "))
            }
            MigrationPrimitive::DropIndex { table, name } => {
                write!(f, "drop index {name} on {table}")
            }
        }
    }
}

/// Map one change onto the primitives that realise it.
///
/// `ADD_TABLE` expands from the whole document (create table plus every declared
/// index); every other change maps onto the document's table.
pub fn primitives_for(
    change: &Change,
    document: &SchemaDocument,
    resolver: &TypeResolver,
) -> Vec<MigrationPrimitive> {
    let table = document.table_name.clone();

    match change {
        Change::AddTable { table } => {
            let mut primitives = vec![MigrationPrimitive::CreateTable {
                table: table.clone(),
                columns: document
                    .fields
                    .iter()
                    .map(|f| ColumnSpec::from_field(f, resolver))
                    .collect(),
            }];
            primitives.extend(document.fields.iter().filter(|f| f.has_index()).map(|f| {
                MigrationPrimitive::CreateIndex {
                    table: table.clone(),
                    name: f.index_name(),
                    columns: vec![f.column_name.clone()],
                    unique: f.unique,
                }
            }));
            primitives.extend(document.indexes.iter().map(|i| MigrationPrimitive::CreateIndex {
                table: table.clone(),
                name: i.name.clone(),
                columns: i.columns.clone(),
                unique: i.unique,
            }));
            primitives
        }
        Change::AddColumn {
            column,
            column_type,
            nullable,
            default_value,
            comment,
        } => vec![MigrationPrimitive::AddColumn {
            table,
            column: ColumnSpec {
                name: column.clone(),
                column_type: column_type.clone(),
                nullable: *nullable,
                default_value: default_value.clone(),
                primary_key: false,
                auto_increment: false,
                comment: comment.clone(),
            },
        }],
        Change::DropColumn { column } => vec![MigrationPrimitive::DropColumn {
            table,
            column: column.clone(),
        }],
        Change::RenameColumn {
            old_column,
            new_column,
            column_type,
        } => vec![MigrationPrimitive::RenameColumn {
            table,
            old_column: old_column.clone(),
            new_column: new_column.clone(),
            column_type: column_type.clone(),
        }],
        Change::ModifyColumnType {
            column, new_type, ..
        } => vec![MigrationPrimitive::AlterColumnType {
            table,
            column: column.clone(),
            new_type: new_type.clone(),
        }],
        Change::ModifyNullable {
            column,
            column_type,
            nullable,
        } => {
            if *nullable {
                vec![MigrationPrimitive::DropNotNull {
                    table,
                    column: column.clone(),
                    column_type: column_type.clone(),
                }]
            } else {
                vec![MigrationPrimitive::AddNotNull {
                    table,
                    column: column.clone(),
                    column_type: column_type.clone(),
                }]
            }
        }
        Change::ModifyDefault {
            column,
            column_type,
            new_default,
            ..
        } => match new_default {
            Some(value) => vec![MigrationPrimitive::AddDefault {
                table,
                column: column.clone(),
                column_type: column_type.clone(),
                value: value.clone(),
            }],
            None => vec![MigrationPrimitive::DropDefault {
                table,
                column: column.clone(),
            }],
        },
        Change::AddIndex {
            name,
            columns,
            unique,
        } => vec![MigrationPrimitive::CreateIndex {
            table,
            name: name.clone(),
            columns: columns.clone(),
            unique: *unique,
        }],
        Change::DropIndex { name } => vec![MigrationPrimitive::DropIndex {
            table,
            name: name.clone(),
        }],
    }
}

/// All primitives for one `apply` call, applied together or not at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationUnit {
    /// Idempotency key: `<entity>-<uuid v7>`
    pub id: String,
    pub entity_name: String,
    pub table_name: String,
    /// Checksum of the change list the unit was derived from
    pub checksum: Checksum,
    pub primitives: Vec<MigrationPrimitive>,
}

impl MigrationUnit {
    /// Mint a fresh unit id for `entity_name`
    pub fn new_id(entity_name: &str) -> String {
        format!("{}-{}", entity_name, Uuid::now_v7())
    }
}

/// Quote an identifier for SQL (`"name"`, inner quotes doubled)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a default value as a SQL expression.
///
/// Numbers, booleans, `NULL`, `CURRENT_*` keywords and already-quoted literals
/// pass through; anything else becomes a quoted string literal.
pub fn render_default(value: &str) -> String {
    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();
    let keyword = matches!(
        upper.as_str(),
        "NULL" | "TRUE" | "FALSE" | "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME"
    );
    let quoted = trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'');

    let numeric = trimmed.parse::<f64>().is_ok() && trimmed.bytes().any(|b| b.is_ascii_digit());

    if keyword || quoted || numeric {
        trimmed.to_string()
    } else {
        format!("'{}'", trimmed.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_default() {
        assert_eq!(render_default("0"), "0");
        assert_eq!(render_default("-1.5"), "-1.5");
        assert_eq!(render_default("current_timestamp"), "current_timestamp");
        assert_eq!(render_default("active"), "'active'");
        assert_eq!(render_default("it's"), "'it''s'");
        assert_eq!(render_default("'draft'"), "'draft'");
        assert_eq!(render_default("NaN"), "'NaN'");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_nullable_change_maps_to_constraint_primitive() {
        let document = SchemaDocument {
            entity_name: "item".to_string(),
            table_name: "items".to_string(),
            label: String::new(),
            description: None,
            fields: vec![],
            indexes: vec![],
            required: vec![],
        };
        let resolver = TypeResolver::new();
        let change = Change::ModifyNullable {
            column: "qty".to_string(),
            column_type: "INTEGER".to_string(),
            nullable: true,
        };

        assert_eq!(
            primitives_for(&change, &document, &resolver),
            vec![MigrationPrimitive::DropNotNull {
                table: "items".to_string(),
                column: "qty".to_string(),
                column_type: "INTEGER".to_string(),
            }]
        );
    }

    #[test]
    fn test_unit_ids_are_distinct() {
        let a = MigrationUnit::new_id("order");
        let b = MigrationUnit::new_id("order");
        assert!(a.starts_with("order-"));
        assert_ne!(a, b);
    }
}
