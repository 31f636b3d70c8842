//! SQLite backing for both the relational store and the document store
//!
//! A [`Database`] is one shared connection. The migration store and the
//! document store may share it or live in separate files.

mod documents;
mod relational;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::{Result, SchemaError};
use crate::migration::quote_ident;

pub use documents::SqliteDocumentStore;
pub use relational::{SqliteRelationalStore, DEFAULT_LEDGER_TABLE};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self::from_connection(conn))
    }

    /// Opens an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchemaError::Storage("connection lock poisoned".to_string()))
    }

    /// Run `f` against the raw connection
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    /// Physical columns of `table`, empty if the table does not exist
    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.lock()?;
        Ok(read_columns(&conn, table)?)
    }

    /// Physical index names of `table`, excluding automatic ones
    pub fn index_names(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
        )?;
        let names = stmt
            .query_map(params![table], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.lock()?;
        Ok(table_exists(&conn, table)?)
    }
}

/// One row of `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    /// Default as SQL text, exactly as declared
    pub default: Option<String>,
    pub primary_key: bool,
}

pub(crate) fn read_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                decl_type: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                default: row.get(4)?,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect();
    columns
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Physical name of a logical index; SQLite index names are database-wide
pub fn physical_index_name(table: &str, index: &str) -> String {
    format!("{table}__{index}")
}
