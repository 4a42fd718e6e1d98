//! Query Executor
//!
//! Runs a validated query against the storage engine, captures column names
//! and rows in engine order, truncates oversized result sets, and classifies
//! failures. The connection carries `PRAGMA query_only`, so even a statement
//! that slipped the gate cannot mutate anything.

use crate::db::{value_ref_to_json, SqliteStore};
use crate::safety::ValidatedQuery;
use rusqlite::ffi::ErrorCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Non-retryable execution failures. Retry policy, if anyone wants one,
/// lives with the caller re-invoking the whole pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("engine rejected the statement: {0}")]
    SyntaxOrSemantic(String),

    #[error("storage engine unavailable: {0}")]
    EngineUnavailable(String),
}

/// Uniform tabular result. Every row holds exactly `columns.len()` values,
/// in matching order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// True when rows beyond the cap were dropped.
    pub truncated: bool,
    /// Row count before truncation.
    pub total_rows: usize,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.total_rows == 0
    }
}

/// Seam between the pipeline and the engine, so tests can count or stub
/// executions.
pub trait StatementExecutor: Send + Sync {
    fn execute(&self, query: &ValidatedQuery) -> Result<ResultSet, ExecutionError>;
}

pub struct SqliteExecutor {
    store: Arc<SqliteStore>,
    max_rows: usize,
}

impl SqliteExecutor {
    /// Marks the shared connection read-only for the rest of its life.
    pub fn new(store: Arc<SqliteStore>, max_rows: usize) -> Result<Self, ExecutionError> {
        store
            .with_conn(|conn| conn.pragma_update(None, "query_only", true))
            .map_err(classify)?;
        Ok(Self { store, max_rows })
    }
}

impl StatementExecutor for SqliteExecutor {
    fn execute(&self, query: &ValidatedQuery) -> Result<ResultSet, ExecutionError> {
        debug!(sql = query.sql(), "executing query");

        // SQLite wraps the single statement in an implicit read transaction;
        // combined with the serialized connection that is the isolation the
        // pipeline needs.
        self.store
            .with_conn(|conn| {
                let mut stmt = conn.prepare(query.sql())?;
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|c| c.to_string()).collect();
                let column_count = columns.len();

                let mut rows = stmt.query([])?;
                let mut kept: Vec<Vec<serde_json::Value>> = Vec::new();
                let mut total_rows = 0usize;
                while let Some(row) = rows.next()? {
                    total_rows += 1;
                    if kept.len() < self.max_rows {
                        let mut values = Vec::with_capacity(column_count);
                        for idx in 0..column_count {
                            values.push(value_ref_to_json(row.get_ref(idx)?));
                        }
                        kept.push(values);
                    }
                }

                Ok(ResultSet {
                    columns,
                    truncated: total_rows > kept.len(),
                    rows: kept,
                    total_rows,
                })
            })
            .map_err(classify)
    }
}

/// Split engine failures into "the statement is wrong" vs "the engine is
/// gone"; the pipeline surfaces both the same way but logs them apart.
fn classify(error: rusqlite::Error) -> ExecutionError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull => ExecutionError::EngineUnavailable(error.to_string()),
            _ => ExecutionError::SyntaxOrSemantic(error.to_string()),
        },
        _ => ExecutionError::SyntaxOrSemantic(error.to_string()),
    }
}
