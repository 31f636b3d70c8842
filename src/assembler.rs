//! Schema assembler
//!
//! Turns an editor's design-time field list into a [`SchemaDocument`]: assigns
//! field ids on first save, keeps existing ids verbatim, appends the system
//! columns and validates composite indexes.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::{
    is_system_column, FieldDef, FieldId, IndexDef, SchemaDocument,
    SystemField, SYSTEM_FIELDS,
};
use crate::error::{Result, SchemaError};
use crate::types::LogicalType;

/// Entity-level metadata submitted by an editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub entity_name: String,
    pub table_name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A field as submitted by an editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Absent on first save; carried back verbatim on every later edit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    pub field_name: String,
    /// Defaults to the snake_case form of `field_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
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
}

impl FieldDescriptor {
    /// Minimal descriptor; everything else takes its default
    pub fn new(field_name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            field_id: None,
            field_name: field_name.into(),
            column_name: None,
            logical_type,
            length: None,
            scale: None,
            nullable: true,
            default_value: None,
            comment: None,
            indexed: false,
            unique: false,
            list_visible: false,
            widget: None,
        }
    }
}

/// Composite index as submitted by an editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Complete submission for creating or updating a draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRequest {
    pub entity: EntityDescriptor,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

/// Build a document from a draft submission
pub fn assemble(request: &DraftRequest) -> Result<SchemaDocument> {
    let entity = &request.entity;
    let entity_name = entity.entity_name.trim();
    if entity_name.is_empty() {
        return Err(SchemaError::invalid("entity name must not be empty"));
    }
    check_identifier("table", &entity.table_name)?;

    let mut fields = Vec::with_capacity(request.fields.len() + SYSTEM_FIELDS.len());
    let mut seen_columns = HashSet::new();
    let mut seen_ids = HashSet::new();

    for descriptor in &request.fields {
        let field = build_field(descriptor)?;

        if !seen_columns.insert(field.column_name.to_ascii_lowercase()) {
            return Err(SchemaError::invalid(format!(
                "duplicate column '{}'",
                field.column_name
            )));
        }
        if !seen_ids.insert(field.field_id.clone()) {
            return Err(SchemaError::invalid(format!(
                "duplicate field id '{}'",
                field.field_id
            )));
        }
        fields.push(field);
    }

    let required = fields
        .iter()
        .filter(|f| !f.nullable)
        .map(|f| f.field_name.clone())
        .collect();

    fields.extend(SYSTEM_FIELDS.iter().map(SystemField::to_field));

    let indexes = build_indexes(&request.indexes, &fields)?;

    Ok(SchemaDocument {
        entity_name: entity_name.to_string(),
        table_name: entity.table_name.clone(),
        label: entity.label.clone(),
        description: entity.description.clone(),
        fields,
        indexes,
        required,
    })
}

/// The editable field list of a document, in the shape the assembler accepts
pub fn extract_fields(document: &SchemaDocument) -> Vec<FieldDescriptor> {
    document
        .user_fields()
        .map(|f| FieldDescriptor {
            field_id: Some(f.field_id.clone()),
            field_name: f.field_name.clone(),
            column_name: Some(f.column_name.clone()),
            logical_type: f.logical_type,
            length: f.length,
            scale: f.scale,
            nullable: f.nullable,
            default_value: f.default_value.clone(),
            comment: f.comment.clone(),
            indexed: f.indexed,
            unique: f.unique,
            list_visible: f.list_visible,
            widget: f.widget.clone(),
        })
        .collect()
}

/// Reconstruct the full submission that would reproduce `document`
pub fn to_request(document: &SchemaDocument) -> DraftRequest {
    DraftRequest {
        entity: EntityDescriptor {
            entity_name: document.entity_name.clone(),
            table_name: document.table_name.clone(),
            label: document.label.clone(),
            description: document.description.clone(),
        },
        fields: extract_fields(document),
        indexes: document
            .indexes
            .iter()
            .map(|i| IndexDescriptor {
                name: i.name.clone(),
                columns: i.columns.clone(),
                unique: i.unique,
            })
            .collect(),
    }
}

fn build_field(descriptor: &FieldDescriptor) -> Result<FieldDef> {
    let field_name = descriptor.field_name.trim();
    if field_name.is_empty() {
        return Err(SchemaError::invalid("field name must not be empty"));
    }

    let column_name = match &descriptor.column_name {
        Some(column) if !column.trim().is_empty() => column.trim().to_string(),
        _ => to_snake_case(field_name),
    };
    check_identifier("column", &column_name)?;
    if is_system_column(&column_name) {
        return Err(SchemaError::invalid(format!(
            "column '{column_name}' is reserved for a system field"
        )));
    }

    let field_id = match &descriptor.field_id {
        Some(id) if id.is_system() => {
            return Err(SchemaError::invalid(format!(
                "field id '{id}' is reserved for a system field"
            )));
        }
        Some(id) if !id.as_str().is_empty() => id.clone(),
        _ => FieldId::generate(),
    };

    match descriptor.logical_type {
        LogicalType::String if descriptor.length == Some(0) => {
            return Err(SchemaError::invalid(format!(
                "field '{field_name}' has zero length"
            )));
        }
        LogicalType::Decimal => {
            if let (Some(precision), Some(scale)) = (descriptor.length, descriptor.scale) {
                if precision == 0 || scale > precision {
                    return Err(SchemaError::invalid(format!(
                        "field '{field_name}' has invalid precision {precision} / scale {scale}"
                    )));
                }
            }
        }
        _ => {}
    }

    Ok(FieldDef {
        field_id,
        field_name: field_name.to_string(),
        column_name,
        logical_type: descriptor.logical_type,
        length: descriptor.length,
        scale: descriptor.scale,
        nullable: descriptor.nullable,
        default_value: descriptor.default_value.clone(),
        comment: descriptor.comment.clone(),
        indexed: descriptor.indexed,
        unique: descriptor.unique,
        list_visible: descriptor.list_visible,
        widget: descriptor.widget.clone(),
        system: false,
        primary_key: false,
        auto_increment: false,
    })
}

fn build_indexes(descriptors: &[IndexDescriptor], fields: &[FieldDef]) -> Result<Vec<IndexDef>> {
    let field_index_names: HashSet<String> = fields
        .iter()
        .filter(|f| f.has_index())
        .map(FieldDef::index_name)
        .collect();
    let mut seen = HashSet::new();
    let mut indexes = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        check_identifier("index", &descriptor.name)?;
        if !seen.insert(descriptor.name.clone()) {
            return Err(SchemaError::invalid(format!(
                "duplicate index '{}'",
                descriptor.name
            )));
        }
        if field_index_names.contains(&descriptor.name) {
            return Err(SchemaError::invalid(format!(
                "index '{}' collides with a field index",
                descriptor.name
            )));
        }
        if descriptor.columns.is_empty() {
            return Err(SchemaError::invalid(format!(
                "index '{}' has no columns",
                descriptor.name
            )));
        }

        // Column names compare case-insensitively, as in the duplicate check above
        let mut columns = Vec::with_capacity(descriptor.columns.len());
        for column in &descriptor.columns {
            let field = fields
                .iter()
                .find(|f| f.column_name.eq_ignore_ascii_case(column))
                .ok_or_else(|| {
                    SchemaError::invalid(format!(
                        "index '{}' references unknown column '{}'",
                        descriptor.name, column
                    ))
                })?;
            if columns.contains(&field.column_name) {
                return Err(SchemaError::invalid(format!(
                    "index '{}' lists column '{}' twice",
                    descriptor.name, column
                )));
            }
            columns.push(field.column_name.clone());
        }

        indexes.push(IndexDef {
            name: descriptor.name.clone(),
            columns,
            unique: descriptor.unique,
        });
    }

    Ok(indexes)
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern"))
}

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::invalid(format!("invalid {kind} name '{name}'")))
    }
}

/// `orderDate` / `Order Date` / `order-date` -> `order_date`
pub(crate) fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;

    for ch in name.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower_or_digit = false;
        } else if ch.is_uppercase() {
            if prev_lower_or_digit && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(ch);
            prev_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }

    out.trim_end_matches('_').to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entity() -> EntityDescriptor {
        EntityDescriptor {
            entity_name: "order".to_string(),
            table_name: "orders".to_string(),
            label: "Order".to_string(),
            description: None,
        }
    }

    fn request(fields: Vec<FieldDescriptor>, indexes: Vec<IndexDescriptor>) -> DraftRequest {
        DraftRequest {
            entity: entity(),
            fields,
            indexes,
        }
    }

    #[test]
    fn test_assigns_ids_and_appends_system_fields() {
        let mut qty = FieldDescriptor::new("quantity", LogicalType::Integer);
        qty.nullable = false;
        let doc = assemble(&request(vec![qty, FieldDescriptor::new("orderDate", LogicalType::Date)], vec![]))
            .unwrap();

        assert_eq!(doc.fields.len(), 2 + SYSTEM_FIELDS.len());
        assert_eq!(doc.fields[1].column_name, "order_date");
        assert!(doc.fields[..2].iter().all(|f| !f.field_id.is_system()));
        assert!(doc.fields[2..].iter().all(|f| f.system));
        assert_eq!(doc.required, vec!["quantity".to_string()]);
        assert_eq!(doc.user_fields().count(), 2);
    }

    #[test]
    fn test_preserves_existing_ids() {
        let mut field = FieldDescriptor::new("qty", LogicalType::Integer);
        field.field_id = Some(FieldId::from("f1"));
        let doc = assemble(&request(vec![field], vec![])).unwrap();
        assert_eq!(doc.fields[0].field_id, FieldId::from("f1"));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let a = FieldDescriptor::new("title", LogicalType::String);
        let mut b = FieldDescriptor::new("heading", LogicalType::String);
        b.column_name = Some("TITLE".to_string());
        let err = assemble(&request(vec![a, b], vec![])).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidSchema(_)));
    }

    #[test]
    fn test_system_column_collision_rejected() {
        let field = FieldDescriptor::new("createdAt", LogicalType::Datetime);
        assert!(matches!(
            assemble(&request(vec![field], vec![])),
            Err(SchemaError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_index_unknown_column_rejected() {
        let field = FieldDescriptor::new("sku", LogicalType::String);
        let index = IndexDescriptor {
            name: "idx_sku_region".to_string(),
            columns: vec!["sku".to_string(), "region".to_string()],
            unique: true,
        };
        let err = assemble(&request(vec![field], vec![index])).unwrap_err();
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn test_index_may_reference_system_column() {
        let field = FieldDescriptor::new("sku", LogicalType::String);
        let index = IndexDescriptor {
            name: "idx_sku_created".to_string(),
            columns: vec!["sku".to_string(), "created_at".to_string()],
            unique: false,
        };
        let doc = assemble(&request(vec![field], vec![index])).unwrap();
        assert_eq!(doc.indexes.len(), 1);
    }

    #[test]
    fn test_index_columns_match_case_insensitively() {
        let field = FieldDescriptor::new("sku", LogicalType::String);
        let index = IndexDescriptor {
            name: "idx_sku_created".to_string(),
            columns: vec!["SKU".to_string(), "Created_At".to_string()],
            unique: false,
        };
        let doc = assemble(&request(vec![field.clone()], vec![index])).unwrap();
        assert_eq!(doc.indexes[0].columns, vec!["sku".to_string(), "created_at".to_string()]);

        let twice = IndexDescriptor {
            name: "idx_sku_twice".to_string(),
            columns: vec!["sku".to_string(), "SKU".to_string()],
            unique: false,
        };
        assert!(matches!(
            assemble(&request(vec![field], vec![twice])),
            Err(SchemaError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        let mut field = FieldDescriptor::new("qty", LogicalType::Integer);
        field.column_name = Some("qty; drop table x".to_string());
        assert!(assemble(&request(vec![field], vec![])).is_err());

        let mut bad_table = request(vec![], vec![]);
        bad_table.entity.table_name = "1orders".to_string();
        assert!(assemble(&bad_table).is_err());
    }

    #[test]
    fn test_extract_round_trip() {
        let mut price = FieldDescriptor::new("price", LogicalType::Decimal);
        price.length = Some(10);
        price.scale = Some(2);
        price.nullable = false;
        price.field_id = Some(FieldId::from("f2"));
        let doc = assemble(&request(vec![price.clone()], vec![])).unwrap();

        let extracted = extract_fields(&doc);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].field_id, price.field_id);
        assert_eq!(extracted[0].column_name.as_deref(), Some("price"));
        assert_eq!(extracted[0].logical_type, LogicalType::Decimal);
        assert!(!extracted[0].nullable);

        let again = assemble(&to_request(&doc)).unwrap();
        assert_eq!(again, doc);
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("orderDate"), "order_date");
        assert_eq!(to_snake_case("Order Date"), "order_date");
        assert_eq!(to_snake_case("order-date"), "order_date");
        assert_eq!(to_snake_case("sku2Code"), "sku2_code");
        assert_eq!(to_snake_case("qty"), "qty");
    }
}
