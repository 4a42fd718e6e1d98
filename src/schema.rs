//! Schema Introspector
//!
//! Reads table, column and foreign-key metadata (plus a few advisory sample
//! rows) from the storage engine once at startup and renders it into the
//! deterministic text block used as generation context.

use crate::db::{display_value, SqliteStore};
use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub decl_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    /// Advisory context only; never used for correctness decisions.
    pub sample_rows: Vec<Vec<serde_json::Value>>,
}

/// Immutable description of the whole schema, built once per process
/// lifetime and shared read-only by all pipeline invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableDescriptor>,
}

impl SchemaDescription {
    /// Introspect the live metadata. Fails with `SchemaUnavailable` when the
    /// engine cannot enumerate any tables (dataset not yet loaded).
    pub fn introspect(store: &SqliteStore, sample_rows_per_table: usize) -> Result<Arc<Self>> {
        let names = store.list_tables()?;
        if names.is_empty() {
            return Err(AgentError::SchemaUnavailable(
                "storage engine has no tables; was the dataset loaded?".to_string(),
            ));
        }

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = store.describe_columns(&name)?;
            let foreign_keys = store.describe_foreign_keys(&name)?;
            let sample_rows = store.sample_rows(&name, sample_rows_per_table)?;
            tables.push(TableDescriptor {
                name,
                columns,
                foreign_keys,
                sample_rows,
            });
        }

        info!(tables = tables.len(), "schema description built");
        Ok(Arc::new(Self { tables }))
    }

    /// Deterministic text rendering fed to the query generator. Identical
    /// metadata always yields identical text, so generation prompts stay
    /// reproducible in tests.
    pub fn render(&self) -> String {
        let mut out = Vec::new();
        for table in &self.tables {
            out.push(format!("--- Table: {} ---", table.name));
            for column in &table.columns {
                let nullable = if column.nullable { "NULL" } else { "NOT NULL" };
                let pk = if column.primary_key { " (PRIMARY KEY)" } else { "" };
                out.push(format!(
                    "  - {}: {} {}{}",
                    column.name, column.decl_type, nullable, pk
                ));
            }
            if !table.foreign_keys.is_empty() {
                out.push("  Foreign Keys:".to_string());
                for fk in &table.foreign_keys {
                    out.push(format!(
                        "    - {} -> {}({})",
                        fk.column, fk.references_table, fk.references_column
                    ));
                }
            }
            if !table.sample_rows.is_empty() {
                out.push("  Sample data:".to_string());
                for (idx, row) in table.sample_rows.iter().enumerate() {
                    let rendered: Vec<String> = table
                        .columns
                        .iter()
                        .zip(row.iter())
                        .map(|(col, value)| format!("{}: {}", col.name, display_value(value)))
                        .collect();
                    out.push(format!("    {}. {}", idx + 1, rendered.join(", ")));
                }
            }
            out.push(String::new());
        }
        out.join("\n")
    }
}
