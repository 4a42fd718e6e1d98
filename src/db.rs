//! Storage engine access
//!
//! Wraps a single shared SQLite connection behind a mutex. The dataset is
//! loaded once at startup from a data-definition script (local file or a
//! versioned remote location); after that the connection is only ever read.

use crate::error::{AgentError, Result};
use crate::schema::{ColumnDescriptor, ForeignKeyDescriptor};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Versioned location of the Chinook data-definition script.
pub const CHINOOK_SQL_URL: &str =
    "https://raw.githubusercontent.com/lerocha/chinook-database/master/ChinookDatabase/DataSources/Chinook_Sqlite.sql";

/// Bound on the dataset script download; the script is a few megabytes at
/// most, so a hung transfer means an unreachable source.
const SCRIPT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared handle to the storage engine. One per process.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a fresh in-memory database. The dataset must be bulk-loaded
    /// before the first pipeline invocation.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a closure against the shared connection.
    ///
    /// A poisoned lock is recovered rather than propagated: the connection
    /// itself carries no in-flight state between calls.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn)
    }

    /// Execute a data-definition script (bulk load).
    pub fn load_script(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(sql))?;
        info!("dataset script executed");
        Ok(())
    }

    /// Bulk-load the dataset from a script file on disk.
    pub fn load_script_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let sql = std::fs::read_to_string(path)?;
        self.load_script(&sql)
    }

    /// Bulk-load the dataset from a script at a remote URL.
    pub async fn load_script_url(&self, url: &str) -> Result<()> {
        info!(url, "downloading dataset script");
        let client = reqwest::Client::builder()
            .timeout(SCRIPT_DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| AgentError::SchemaUnavailable(format!("script download failed: {}", e)))?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::SchemaUnavailable(format!("script download failed: {}", e)))?;
        let sql = response
            .text()
            .await
            .map_err(|e| AgentError::SchemaUnavailable(format!("script download failed: {}", e)))?;
        self.load_script(&sql)
    }

    /// All user table names, ordered by name for deterministic output.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let tables = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(tables)
    }

    /// Column metadata for a table, in the engine's declared ordinal order.
    pub fn describe_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let columns = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
            let rows = stmt.query_map([], |row| {
                Ok(ColumnDescriptor {
                    name: row.get(1)?,
                    decl_type: row.get(2)?,
                    nullable: row.get::<_, i64>(3)? == 0,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(columns)
    }

    /// Foreign keys declared on a table.
    pub fn describe_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let keys = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
            let rows = stmt.query_map([], |row| {
                Ok(ForeignKeyDescriptor {
                    column: row.get(3)?,
                    references_table: row.get(2)?,
                    // NULL here means the FK targets the referenced table's
                    // primary key implicitly; Chinook always declares it.
                    references_column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(keys)
    }

    /// Up to `limit` advisory sample rows from a table.
    pub fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Vec<serde_json::Value>>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT * FROM {} LIMIT {}", quote_ident(table), limit))?;
            let column_count = stmt.column_count();
            let rows = stmt.query_map([], |row| {
                let mut values = Vec::with_capacity(column_count);
                for idx in 0..column_count {
                    values.push(value_ref_to_json(row.get_ref(idx)?));
                }
                Ok(values)
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(rows)
    }
}

/// Quote an identifier for embedding in PRAGMA/SELECT text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Convert a native SQLite value into the uniform JSON representation. SQLite
/// has no boolean storage class; 0/1 integers pass through as numbers.
pub(crate) fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Render a uniform value for prompts and log lines.
pub(crate) fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}
