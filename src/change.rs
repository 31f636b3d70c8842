//! Structural changes between two schema documents

use std::fmt;

use serde::{Deserialize, Serialize};

/// One atomic structural difference.
///
/// Each variant carries only what its kind needs. Instances are produced by the
/// detector and consumed unchanged by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Change {
    AddTable {
        table: String,
    },
    AddColumn {
        column: String,
        column_type: String,
        nullable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    DropColumn {
        column: String,
    },
    RenameColumn {
        old_column: String,
        new_column: String,
        column_type: String,
    },
    ModifyColumnType {
        column: String,
        old_type: String,
        new_type: String,
    },
    ModifyNullable {
        column: String,
        column_type: String,
        nullable: bool,
    },
    ModifyDefault {
        column: String,
        column_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_default: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_default: Option<String>,
    },
    AddIndex {
        name: String,
        columns: Vec<String>,
        unique: bool,
    },
    DropIndex {
        name: String,
    },
}

impl Change {
    /// Short upper-case tag, e.g. `RENAME_COLUMN`
    pub fn kind(&self) -> &'static str {
        match self {
            Change::AddTable { .. } => "ADD_TABLE",
            Change::AddColumn { .. } => "ADD_COLUMN",
            Change::DropColumn { .. } => "DROP_COLUMN",
            Change::RenameColumn { .. } => "RENAME_COLUMN",
            Change::ModifyColumnType { .. } => "MODIFY_COLUMN_TYPE",
            Change::ModifyNullable { .. } => "MODIFY_NULLABLE",
            Change::ModifyDefault { .. } => "MODIFY_DEFAULT",
            Change::AddIndex { .. } => "ADD_INDEX",
            Change::DropIndex { .. } => "DROP_INDEX",
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::AddTable { table } => write!(f, "create table {table}"),
            Change::AddColumn {
                column,
                column_type,
                nullable,
                ..
            } => {
                write!(f, "add column {column} {column_type}")?;
                if !nullable {
                    write!(f, " not null")?;
                }
                Ok(())
            }
            Change::DropColumn { column } => write!(f, "drop column {column}"),
            Change::RenameColumn {
                old_column,
                new_column,
                ..
            } => write!(f, "rename column {old_column} to {new_column}"),
            Change::ModifyColumnType {
                column,
                old_type,
                new_type,
            } => write!(f, "change type of {column} from {old_type} to {new_type}"),
            Change::ModifyNullable {
                column, nullable, ..
            } => {
                if *nullable {
                    write!(f, "make {column} nullable")
                } else {
                    write!(f, "make {column} not null")
                }
            }
            Change::ModifyDefault {
                column,
                new_default,
                ..
            } => match new_default {
                Some(value) => write!(f, "set default of {column} to {value}"),
                None => write!(f, "drop default of {column}"),
            },
            Change::AddIndex {
                name,
                columns,
                unique,
            } => {
                let kind = if *unique { "unique index" } else { "index" };
                write!(f, "add {kind} {name} on ({})", columns.join(", "))
            }
            Change::DropIndex { name } => write!(f, "drop index {name}"),
        }
    }
}

/// Human-readable summary of a change list, one change per line
pub fn summarize(changes: &[Change]) -> String {
    if changes.is_empty() {
        return "No changes detected".to_string();
    }
    changes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag() {
        let change = Change::DropColumn {
            column: "legacy_flag".to_string(),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "kind": "DROP_COLUMN", "column": "legacy_flag" })
        );
        assert_eq!(change.kind(), "DROP_COLUMN");
    }

    #[test]
    fn test_summary() {
        let changes = vec![
            Change::RenameColumn {
                old_column: "qty".to_string(),
                new_column: "quantity".to_string(),
                column_type: "INTEGER".to_string(),
            },
            Change::AddIndex {
                name: "idx_sku".to_string(),
                columns: vec!["sku".to_string()],
                unique: true,
            },
        ];
        assert_eq!(
            summarize(&changes),
            "rename column qty to quantity\nadd unique index idx_sku on (sku)"
        );
        assert_eq!(summarize(&[]), "No changes detected");
    }
}
