//! Migration units applied to SQLite
//!
//! Each unit runs in one transaction. Applied unit ids are recorded in a ledger
//! table inside the same transaction, so a unit either commits together with its
//! ledger row or leaves no trace.
//!
//! SQLite cannot alter a column's type, nullability or default in place, nor add
//! a NOT NULL column without a default. Those primitives rebuild the table:
//! create a copy with the new definition, move the rows, swap the names and
//! re-create the indexes.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use super::{physical_index_name, read_columns, table_exists, ColumnInfo, Database};
use crate::error::{Result, SchemaError};
use crate::executor::{PrimitiveFailure, RelationalStore, UnitOutcome};
use crate::migration::{quote_ident, render_default, ColumnSpec, MigrationPrimitive, MigrationUnit};

pub const DEFAULT_LEDGER_TABLE: &str = "_schema_migrations";

/// [`RelationalStore`] backed by a SQLite database
pub struct SqliteRelationalStore {
    db: Database,
    ledger_table: String,
}

impl SqliteRelationalStore {
    pub fn new(db: Database) -> Result<Self> {
        Self::with_ledger_table(db, DEFAULT_LEDGER_TABLE)
    }

    pub fn with_ledger_table(db: Database, ledger_table: &str) -> Result<Self> {
        let store = Self {
            db,
            ledger_table: ledger_table.to_string(),
        };
        store.init_ledger()?;
        Ok(store)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn init_ledger(&self) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                entity_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                primitive_count INTEGER NOT NULL,
                applied_at TEXT NOT NULL
            )",
            quote_ident(&self.ledger_table)
        ))?;
        Ok(())
    }

    /// Whether a unit id has been committed
    pub fn is_applied(&self, unit_id: &str) -> Result<bool> {
        let conn = self.db.lock()?;
        Ok(ledger_contains(&conn, &self.ledger_table, unit_id)?)
    }

    /// Ids of committed units for an entity, oldest first
    pub fn applied_units(&self, entity_name: &str) -> Result<Vec<String>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM {} WHERE entity_name = ?1 ORDER BY applied_at, rowid",
            quote_ident(&self.ledger_table)
        ))?;
        let ids = stmt
            .query_map(params![entity_name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

impl RelationalStore for SqliteRelationalStore {
    fn apply_unit(&self, unit: &MigrationUnit) -> std::result::Result<UnitOutcome, PrimitiveFailure> {
        let mut conn = self
            .db
            .lock()
            .map_err(|e| PrimitiveFailure::new("acquire connection", e))?;
        let tx = conn
            .transaction()
            .map_err(|e| PrimitiveFailure::new("begin transaction", e))?;

        if ledger_contains(&tx, &self.ledger_table, &unit.id)
            .map_err(|e| PrimitiveFailure::new("read migration ledger", e))?
        {
            return Ok(UnitOutcome::AlreadyApplied);
        }

        for (position, primitive) in unit.primitives.iter().enumerate() {
            debug!(unit = %unit.id, step = position + 1, %primitive, "executing primitive");
            execute(&tx, primitive)
                .map_err(|e| PrimitiveFailure::new(format!("step {} ({})", position + 1, primitive), e))?;
        }

        tx.execute(
            &format!(
                "INSERT INTO {} (id, entity_name, table_name, checksum, primitive_count, applied_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                quote_ident(&self.ledger_table)
            ),
            params![
                unit.id,
                unit.entity_name,
                unit.table_name,
                unit.checksum.as_str(),
                unit.primitives.len() as i64,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| PrimitiveFailure::new("record migration unit", e))?;

        tx.commit()
            .map_err(|e| PrimitiveFailure::new("commit transaction", e))?;
        Ok(UnitOutcome::Applied)
    }
}

fn ledger_contains(conn: &Connection, ledger_table: &str, unit_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!("SELECT 1 FROM {} WHERE id = ?1", quote_ident(ledger_table)),
        params![unit_id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn execute(tx: &Transaction<'_>, primitive: &MigrationPrimitive) -> Result<()> {
    match primitive {
        MigrationPrimitive::CreateTable { table, columns } => {
            let defs: Vec<String> = columns.iter().map(column_definition).collect();
            tx.execute_batch(&format!(
                "CREATE TABLE {} (\n    {}\n)",
                quote_ident(table),
                defs.join(",\n    ")
            ))?;
        }
        MigrationPrimitive::AddColumn { table, column } => {
            if needs_rebuild_to_add(column) {
                add_column_by_rebuild(tx, table, column)?;
            } else {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote_ident(table),
                    column_definition(column)
                ))?;
            }
        }
        MigrationPrimitive::DropColumn { table, column } => {
            tx.execute_batch(&format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(table),
                quote_ident(column)
            ))?;
        }
        MigrationPrimitive::RenameColumn {
            table,
            old_column,
            new_column,
            ..
        } => {
            tx.execute_batch(&format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quote_ident(table),
                quote_ident(old_column),
                quote_ident(new_column)
            ))?;
        }
        MigrationPrimitive::AlterColumnType {
            table,
            column,
            new_type,
        } => alter_column(tx, table, column, |c| c.decl_type = new_type.clone())?,
        MigrationPrimitive::AddNotNull { table, column, .. } => {
            alter_column(tx, table, column, |c| c.not_null = true)?
        }
        MigrationPrimitive::DropNotNull { table, column, .. } => {
            alter_column(tx, table, column, |c| c.not_null = false)?
        }
        MigrationPrimitive::AddDefault {
            table,
            column,
            value,
            ..
        } => alter_column(tx, table, column, |c| c.default = Some(render_default(value)))?,
        MigrationPrimitive::DropDefault { table, column } => {
            alter_column(tx, table, column, |c| c.default = None)?
        }
        MigrationPrimitive::CreateIndex {
            table,
            name,
            columns,
            unique,
        } => {
            let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            tx.execute_batch(&format!(
                "CREATE {}INDEX {} ON {} ({})",
                if *unique { "UNIQUE " } else { "" },
                quote_ident(&physical_index_name(table, name)),
                quote_ident(table),
                cols.join(", ")
            ))?;
        }
        MigrationPrimitive::DropIndex { table, name } => {
            tx.execute_batch(&format!(
                "DROP INDEX {}",
                quote_ident(&physical_index_name(table, name))
            ))?;
        }
    }
    Ok(())
}

fn column_definition(spec: &ColumnSpec) -> String {
    let name = quote_ident(&spec.name);
    if spec.primary_key && spec.auto_increment {
        // AUTOINCREMENT is only accepted on an INTEGER PRIMARY KEY
        return format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT");
    }

    let mut def = format!("{} {}", name, spec.column_type);
    if spec.primary_key {
        def.push_str(" PRIMARY KEY");
    }
    if !spec.nullable || spec.primary_key {
        def.push_str(" NOT NULL");
    }
    if let Some(value) = &spec.default_value {
        def.push_str(" DEFAULT ");
        def.push_str(&render_default(value));
    }
    def
}

/// `ALTER TABLE ADD COLUMN` rejects NOT NULL without a default and
/// non-constant defaults
fn needs_rebuild_to_add(spec: &ColumnSpec) -> bool {
    match &spec.default_value {
        None => !spec.nullable,
        Some(value) => value.trim().to_ascii_uppercase().starts_with("CURRENT_"),
    }
}

fn add_column_by_rebuild(tx: &Transaction<'_>, table: &str, spec: &ColumnSpec) -> Result<()> {
    let mut columns = existing_columns(tx, table)?;
    if columns.iter().any(|c| c.name.eq_ignore_ascii_case(&spec.name)) {
        return Err(SchemaError::Storage(format!(
            "duplicate column name: {}",
            spec.name
        )));
    }
    let copy: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    columns.push(ColumnInfo {
        name: spec.name.clone(),
        decl_type: spec.column_type.clone(),
        not_null: !spec.nullable,
        default: spec.default_value.as_deref().map(render_default),
        primary_key: false,
    });
    rebuild_table(tx, table, &columns, &copy)
}

fn alter_column(
    tx: &Transaction<'_>,
    table: &str,
    column: &str,
    edit: impl FnOnce(&mut ColumnInfo),
) -> Result<()> {
    let mut columns = existing_columns(tx, table)?;
    let target = columns
        .iter_mut()
        .find(|c| c.name.eq_ignore_ascii_case(column))
        .ok_or_else(|| SchemaError::Storage(format!("no such column: {table}.{column}")))?;
    edit(target);
    let copy: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    rebuild_table(tx, table, &columns, &copy)
}

fn existing_columns(tx: &Transaction<'_>, table: &str) -> Result<Vec<ColumnInfo>> {
    if !table_exists(tx, table)? {
        return Err(SchemaError::Storage(format!("no such table: {table}")));
    }
    Ok(read_columns(tx, table)?)
}

fn rebuild_table(
    tx: &Transaction<'_>,
    table: &str,
    columns: &[ColumnInfo],
    copy: &[String],
) -> Result<()> {
    let table_sql: String = tx.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    let autoincrement = table_sql.to_ascii_uppercase().contains("AUTOINCREMENT");

    // The sequence row goes away with the dropped table; ids of deleted rows must not come back.
    let sequence: Option<i64> = if autoincrement {
        tx.query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?
    } else {
        None
    };

    let index_sql = {
        let mut stmt = tx.prepare(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
        )?;
        let sql = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        sql
    };

    let defs: Vec<String> = columns
        .iter()
        .map(|c| {
            let name = quote_ident(&c.name);
            if c.primary_key && autoincrement {
                return format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT");
            }
            let mut def = format!("{} {}", name, c.decl_type);
            if c.primary_key {
                def.push_str(" PRIMARY KEY");
            }
            if c.not_null {
                def.push_str(" NOT NULL");
            }
            if let Some(value) = &c.default {
                def.push_str(" DEFAULT ");
                def.push_str(value);
            }
            def
        })
        .collect();

    let scratch = format!("_rebuild_{table}");
    let copy_list = copy.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");

    debug!(table, scratch = %scratch, "rebuilding table");
    tx.execute_batch(&format!(
        "CREATE TABLE {} ({})",
        quote_ident(&scratch),
        defs.join(", ")
    ))?;
    if !copy.is_empty() {
        tx.execute_batch(&format!(
            "INSERT INTO {} ({copy_list}) SELECT {copy_list} FROM {}",
            quote_ident(&scratch),
            quote_ident(table)
        ))?;
    }
    tx.execute_batch(&format!("DROP TABLE {}", quote_ident(table)))?;
    tx.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(&scratch),
        quote_ident(table)
    ))?;
    if let Some(seq) = sequence {
        tx.execute("DELETE FROM sqlite_sequence WHERE name = ?1", params![table])?;
        tx.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
            params![table, seq],
        )?;
    }
    for sql in index_sql {
        tx.execute_batch(&sql)?;
    }
    Ok(())
}
