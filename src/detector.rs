//! Schema change detection
//!
//! Diffs a new document against the currently published one. Fields are matched
//! by [`FieldId`](crate::document::FieldId) only, so a column rename shows up as
//! a single `RENAME_COLUMN` instead of a drop plus an add.
//!
//! Output order:
//! 1. composite index drops (removed or redefined)
//! 2. removed fields: field index drop, then column drop
//! 3. matched fields: field index drops, then renames
//! 4. matched fields: type, nullability, default
//! 5. matched fields: field index adds
//! 6. added fields: column add, then field index add
//! 7. composite index adds (new or redefined)
//!
//! Every index is dropped before it is re-added and before any of its columns
//! disappear; a column name freed by a drop or a rename can be reused later in
//! the list. Renames are ordered so no target name is still in use, and a
//! cycle of renames (`a -> b`, `b -> a`) goes through a temporary column.

use std::collections::HashMap;

use crate::change::Change;
use crate::document::{FieldDef, FieldId, SchemaDocument};
use crate::types::TypeResolver;

/// Computes the ordered change list between two documents. Pure, no I/O.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    resolver: TypeResolver,
}

impl ChangeDetector {
    pub fn new(resolver: TypeResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &TypeResolver {
        &self.resolver
    }

    /// Diff `new` against `old`; an absent `old` always yields a single `ADD_TABLE`
    pub fn detect_changes(&self, new: &SchemaDocument, old: Option<&SchemaDocument>) -> Vec<Change> {
        let Some(old) = old else {
            return vec![Change::AddTable {
                table: new.table_name.clone(),
            }];
        };

        let old_fields: HashMap<&FieldId, &FieldDef> =
            old.fields.iter().map(|f| (&f.field_id, f)).collect();
        let new_fields: HashMap<&FieldId, &FieldDef> =
            new.fields.iter().map(|f| (&f.field_id, f)).collect();

        let mut changes = Vec::new();

        for old_index in &old.indexes {
            match new.index(&old_index.name) {
                Some(new_index) if new_index.same_definition(old_index) => {}
                _ => changes.push(Change::DropIndex {
                    name: old_index.name.clone(),
                }),
            }
        }

        for old_field in old.fields.iter().filter(|f| !new_fields.contains_key(&f.field_id)) {
            if old_field.has_index() {
                changes.push(Change::DropIndex {
                    name: old_field.index_name(),
                });
            }
            changes.push(Change::DropColumn {
                column: old_field.column_name.clone(),
            });
        }

        let matched: Vec<(&FieldDef, &FieldDef)> = new
            .fields
            .iter()
            .filter_map(|f| old_fields.get(&f.field_id).map(|old| (*old, f)))
            .collect();

        let mut index_adds = Vec::new();
        let mut renames = Vec::new();
        for (old_field, new_field) in &matched {
            let renamed = old_field.column_name != new_field.column_name;
            // Index type cannot be altered in place, and a renamed column gets a
            // renamed field index, so both cases are a drop followed by an add.
            match (old_field.has_index(), new_field.has_index()) {
                (false, true) => index_adds.push(add_field_index(new_field)),
                (true, false) => changes.push(Change::DropIndex {
                    name: old_field.index_name(),
                }),
                (true, true) if renamed || old_field.unique != new_field.unique => {
                    changes.push(Change::DropIndex {
                        name: old_field.index_name(),
                    });
                    index_adds.push(add_field_index(new_field));
                }
                _ => {}
            }
            if renamed {
                renames.push(PendingRename {
                    field_id: &new_field.field_id,
                    from: old_field.column_name.clone(),
                    to: new_field.column_name.clone(),
                    column_type: old_field.resolved_type(&self.resolver),
                });
            }
        }
        order_renames(renames, &mut changes);

        for (old_field, new_field) in &matched {
            self.diff_definition(old_field, new_field, &mut changes);
        }
        changes.append(&mut index_adds);

        for new_field in new.fields.iter().filter(|f| !old_fields.contains_key(&f.field_id)) {
            changes.push(Change::AddColumn {
                column: new_field.column_name.clone(),
                column_type: new_field.resolved_type(&self.resolver),
                nullable: new_field.nullable,
                default_value: normalized_default(&new_field.default_value).map(String::from),
                comment: new_field.comment.clone(),
            });
            if new_field.has_index() {
                changes.push(add_field_index(new_field));
            }
        }

        for new_index in &new.indexes {
            match old.index(&new_index.name) {
                Some(old_index) if old_index.same_definition(new_index) => {}
                _ => changes.push(Change::AddIndex {
                    name: new_index.name.clone(),
                    columns: new_index.columns.clone(),
                    unique: new_index.unique,
                }),
            }
        }

        changes
    }

    /// Type, nullability and default of a matched field, under its new name
    fn diff_definition(&self, old: &FieldDef, new: &FieldDef, changes: &mut Vec<Change>) {
        let old_type = old.resolved_type(&self.resolver);
        let new_type = new.resolved_type(&self.resolver);
        let column = new.column_name.clone();

        if old_type != new_type {
            changes.push(Change::ModifyColumnType {
                column: column.clone(),
                old_type,
                new_type: new_type.clone(),
            });
        }

        if old.nullable != new.nullable {
            changes.push(Change::ModifyNullable {
                column: column.clone(),
                column_type: new_type.clone(),
                nullable: new.nullable,
            });
        }

        let old_default = normalized_default(&old.default_value);
        let new_default = normalized_default(&new.default_value);
        if old_default != new_default {
            changes.push(Change::ModifyDefault {
                column,
                column_type: new_type,
                old_default: old_default.map(String::from),
                new_default: new_default.map(String::from),
            });
        }
    }
}

struct PendingRename<'a> {
    field_id: &'a FieldId,
    from: String,
    to: String,
    column_type: String,
}

/// Emit renames so that no rename targets a name another pending rename still
/// holds. When only cycles remain, the first pending column moves to a
/// temporary name, which frees its name for the rest of the cycle.
fn order_renames(mut pending: Vec<PendingRename<'_>>, changes: &mut Vec<Change>) {
    while !pending.is_empty() {
        let ready = pending.iter().position(|rename| {
            !pending
                .iter()
                .any(|other| other.from.eq_ignore_ascii_case(&rename.to))
        });

        match ready {
            Some(position) => {
                let rename = pending.remove(position);
                changes.push(Change::RenameColumn {
                    old_column: rename.from,
                    new_column: rename.to,
                    column_type: rename.column_type,
                });
            }
            None => {
                let rename = &mut pending[0];
                let temporary = temporary_column(rename.field_id);
                changes.push(Change::RenameColumn {
                    old_column: std::mem::replace(&mut rename.from, temporary.clone()),
                    new_column: temporary,
                    column_type: rename.column_type.clone(),
                });
            }
        }
    }
}

/// `__tmp_<fieldId>` with anything outside `[A-Za-z0-9_]` replaced
fn temporary_column(field_id: &FieldId) -> String {
    let suffix: String = field_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("__tmp_{suffix}")
}

fn add_field_index(field: &FieldDef) -> Change {
    Change::AddIndex {
        name: field.index_name(),
        columns: vec![field.column_name.clone()],
        unique: field.unique,
    }
}

/// Blank and absent defaults compare equal
fn normalized_default(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{assemble, DraftRequest, EntityDescriptor, FieldDescriptor};
    use crate::types::LogicalType;
    use pretty_assertions::assert_eq;

    fn doc(fields: Vec<FieldDescriptor>) -> SchemaDocument {
        assemble(&DraftRequest {
            entity: EntityDescriptor {
                entity_name: "item".to_string(),
                table_name: "items".to_string(),
                label: "Item".to_string(),
                description: None,
            },
            fields,
            indexes: vec![],
        })
        .unwrap()
    }

    fn field(id: &str, column: &str, logical_type: LogicalType) -> FieldDescriptor {
        let mut f = FieldDescriptor::new(column, logical_type);
        f.field_id = Some(FieldId::from(id));
        f.column_name = Some(column.to_string());
        f
    }

    #[test]
    fn test_blank_defaults_are_equal() {
        let mut a = field("f1", "note", LogicalType::Text);
        a.default_value = Some("   ".to_string());
        let b = field("f1", "note", LogicalType::Text);

        let detector = ChangeDetector::default();
        assert!(detector.detect_changes(&doc(vec![b]), Some(&doc(vec![a]))).is_empty());
    }

    #[test]
    fn test_rename_of_indexed_column_moves_field_index() {
        let mut old = field("f1", "sku", LogicalType::String);
        old.indexed = true;
        let mut new = field("f1", "sku_code", LogicalType::String);
        new.indexed = true;

        let changes = ChangeDetector::default().detect_changes(&doc(vec![new]), Some(&doc(vec![old])));
        assert_eq!(
            changes,
            vec![
                Change::DropIndex {
                    name: "idx_sku".to_string()
                },
                Change::RenameColumn {
                    old_column: "sku".to_string(),
                    new_column: "sku_code".to_string(),
                    column_type: "VARCHAR(255)".to_string(),
                },
                Change::AddIndex {
                    name: "idx_sku_code".to_string(),
                    columns: vec!["sku_code".to_string()],
                    unique: false,
                },
            ]
        );
    }

    #[test]
    fn test_rename_and_type_change_together() {
        let old = field("f1", "qty", LogicalType::Integer);
        let new = field("f1", "quantity", LogicalType::Long);

        let changes = ChangeDetector::default().detect_changes(&doc(vec![new]), Some(&doc(vec![old])));
        let kinds: Vec<_> = changes.iter().map(Change::kind).collect();
        assert_eq!(kinds, vec!["RENAME_COLUMN", "MODIFY_COLUMN_TYPE"]);
    }

    #[test]
    fn test_drop_precedes_add_for_reused_column_name() {
        let old = field("f1", "status", LogicalType::Integer);
        let new = field("f9", "status", LogicalType::String);

        let changes = ChangeDetector::default().detect_changes(&doc(vec![new]), Some(&doc(vec![old])));
        let kinds: Vec<_> = changes.iter().map(Change::kind).collect();
        assert_eq!(kinds, vec!["DROP_COLUMN", "ADD_COLUMN"]);
    }

    fn renames(changes: &[Change]) -> Vec<(&str, &str)> {
        changes
            .iter()
            .filter_map(|c| match c {
                Change::RenameColumn {
                    old_column,
                    new_column,
                    ..
                } => Some((old_column.as_str(), new_column.as_str())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_rename_chain_frees_target_first() {
        let old = doc(vec![
            field("f1", "a", LogicalType::String),
            field("f2", "b", LogicalType::String),
        ]);
        let new = doc(vec![
            field("f1", "b", LogicalType::String),
            field("f2", "c", LogicalType::String),
        ]);

        let changes = ChangeDetector::default().detect_changes(&new, Some(&old));
        assert_eq!(renames(&changes), vec![("b", "c"), ("a", "b")]);
    }

    #[test]
    fn test_rename_swap_goes_through_temporary_column() {
        let old = doc(vec![
            field("f1", "a", LogicalType::String),
            field("f2", "b", LogicalType::String),
        ]);
        let new = doc(vec![
            field("f1", "b", LogicalType::String),
            field("f2", "a", LogicalType::String),
        ]);

        let changes = ChangeDetector::default().detect_changes(&new, Some(&old));
        assert_eq!(
            renames(&changes),
            vec![("a", "__tmp_f1"), ("b", "a"), ("__tmp_f1", "b")]
        );
    }

    #[test]
    fn test_temporary_column_is_an_identifier() {
        let id = FieldId::from("0190a1b2-c3d4-7e5f-8a9b-0c1d2e3f4a5b");
        assert_eq!(
            temporary_column(&id),
            "__tmp_0190a1b2_c3d4_7e5f_8a9b_0c1d2e3f4a5b"
        );
    }
}
