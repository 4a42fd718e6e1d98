//! Query Safety Gate
//!
//! The sole mandatory security boundary between the generator and the
//! executor. A candidate passes only when it parses as exactly one read-only
//! query; anything ambiguous is rejected, never waved through.

use crate::generator::{GeneratedQuery, Relevance};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use tracing::debug;

/// Rejection reasons, in priority order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    #[error("question was marked unanswerable by the generator")]
    MarkedUnanswerable,

    #[error("statement is not a single read-only query: {0}")]
    NotReadOnly(String),

    #[error("more than one statement supplied")]
    MultiStatement,
}

/// A query that passed the gate. Only constructible through
/// [`SafetyGate::validate`].
#[derive(Debug, Clone)]
pub struct ValidatedQuery {
    sql: String,
}

impl ValidatedQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

pub struct SafetyGate;

impl SafetyGate {
    /// Pure validation over the candidate; no side effects.
    pub fn validate(candidate: GeneratedQuery) -> Result<ValidatedQuery, GateRejection> {
        if candidate.relevance == Relevance::Unanswerable {
            return Err(GateRejection::MarkedUnanswerable);
        }

        let sql = candidate.sql.trim();
        if sql.is_empty() {
            return Err(GateRejection::NotReadOnly("empty statement".to_string()));
        }

        // The parser handles leading comments and trailing semicolons for
        // us, and a parse failure rejects: an unparseable statement is an
        // ambiguous one.
        let statements = match Parser::parse_sql(&SQLiteDialect {}, sql) {
            Ok(statements) => statements,
            Err(e) => {
                debug!(error = %e, "candidate failed to parse");
                return Err(GateRejection::NotReadOnly(format!("unparseable: {}", e)));
            }
        };

        if statements.is_empty() {
            return Err(GateRejection::NotReadOnly("empty statement".to_string()));
        }

        // A write anywhere in the batch outranks the multi-statement reason.
        if let Some(statement) = statements.iter().find(|s| !is_read_only(s)) {
            return Err(GateRejection::NotReadOnly(statement_kind(statement)));
        }

        if statements.len() > 1 {
            return Err(GateRejection::MultiStatement);
        }

        Ok(ValidatedQuery {
            sql: sql.to_string(),
        })
    }
}

fn is_read_only(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => query_is_read_only(query),
        _ => false,
    }
}

/// `SELECT ... INTO` parses as a query but creates a table; reject it along
/// with any DML smuggled into a CTE or set-operation arm.
fn query_is_read_only(query: &Query) -> bool {
    if let Some(with) = &query.with {
        if !with.cte_tables.iter().all(|cte| query_is_read_only(&cte.query)) {
            return false;
        }
    }
    set_expr_is_read_only(&query.body)
}

fn set_expr_is_read_only(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(inner) => query_is_read_only(inner),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_read_only(left) && set_expr_is_read_only(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        SetExpr::Insert(_) | SetExpr::Update(_) => false,
    }
}

fn statement_kind(statement: &Statement) -> String {
    match statement {
        Statement::Query(_) => "SELECT INTO statement".to_string(),
        Statement::Insert { .. } => "INSERT statement".to_string(),
        Statement::Update { .. } => "UPDATE statement".to_string(),
        Statement::Delete { .. } => "DELETE statement".to_string(),
        Statement::Drop { .. } => "DROP statement".to_string(),
        Statement::CreateTable { .. } | Statement::CreateView { .. } => {
            "CREATE statement".to_string()
        }
        Statement::AlterTable { .. } => "ALTER statement".to_string(),
        _ => "write or DDL statement".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answerable(sql: &str) -> GeneratedQuery {
        GeneratedQuery {
            sql: sql.to_string(),
            relevance: Relevance::Answerable,
            rationale: None,
        }
    }

    #[test]
    fn accepts_plain_select() {
        let validated = SafetyGate::validate(answerable("SELECT COUNT(*) FROM Artist")).unwrap();
        assert_eq!(validated.sql(), "SELECT COUNT(*) FROM Artist");
    }

    #[test]
    fn accepts_cte_query() {
        let sql = "WITH counts AS (SELECT ArtistId, COUNT(*) AS n FROM Album GROUP BY ArtistId) \
                   SELECT * FROM counts ORDER BY n DESC LIMIT 5";
        assert!(SafetyGate::validate(answerable(sql)).is_ok());
    }

    #[test]
    fn accepts_trailing_semicolon() {
        assert!(SafetyGate::validate(answerable("SELECT 1;")).is_ok());
    }

    #[test]
    fn accepts_leading_comment() {
        let sql = "-- top artists\nSELECT Name FROM Artist LIMIT 3";
        assert!(SafetyGate::validate(answerable(sql)).is_ok());
    }

    #[test]
    fn accepts_write_keyword_inside_string_literal() {
        let sql = "SELECT * FROM Track WHERE Name = 'DROP everything'";
        assert!(SafetyGate::validate(answerable(sql)).is_ok());
    }

    #[test]
    fn rejects_delete() {
        let err = SafetyGate::validate(answerable("DELETE FROM Customer")).unwrap_err();
        assert!(matches!(err, GateRejection::NotReadOnly(_)));
    }

    #[test]
    fn rejects_insert_update_drop() {
        for sql in [
            "INSERT INTO Artist (Name) VALUES ('x')",
            "UPDATE Artist SET Name = 'x'",
            "DROP TABLE Artist",
        ] {
            let err = SafetyGate::validate(answerable(sql)).unwrap_err();
            assert!(matches!(err, GateRejection::NotReadOnly(_)), "sql: {}", sql);
        }
    }

    #[test]
    fn rejects_select_into() {
        let err =
            SafetyGate::validate(answerable("SELECT * INTO Backup FROM Artist")).unwrap_err();
        assert!(matches!(err, GateRejection::NotReadOnly(_)));
    }

    #[test]
    fn rejects_lowercase_write() {
        let err = SafetyGate::validate(answerable("delete from Customer")).unwrap_err();
        assert!(matches!(err, GateRejection::NotReadOnly(_)));
    }

    #[test]
    fn rejects_disguised_mutation_in_second_statement() {
        let err =
            SafetyGate::validate(answerable("SELECT 1; DROP TABLE Customer")).unwrap_err();
        assert!(matches!(err, GateRejection::NotReadOnly(_)));
    }

    #[test]
    fn rejects_two_selects_as_multi_statement() {
        let err = SafetyGate::validate(answerable("SELECT 1; SELECT 2")).unwrap_err();
        assert_eq!(err, GateRejection::MultiStatement);
    }

    #[test]
    fn rejects_unparseable_as_not_read_only() {
        let err = SafetyGate::validate(answerable("SELEC COUNT(*) FORM Artist")).unwrap_err();
        assert!(matches!(err, GateRejection::NotReadOnly(_)));
    }

    #[test]
    fn unanswerable_outranks_everything() {
        let candidate = GeneratedQuery {
            sql: "DELETE FROM Customer".to_string(),
            relevance: Relevance::Unanswerable,
            rationale: None,
        };
        assert_eq!(
            SafetyGate::validate(candidate).unwrap_err(),
            GateRejection::MarkedUnanswerable
        );
    }

    #[test]
    fn rejects_empty_statement() {
        let err = SafetyGate::validate(answerable("   ")).unwrap_err();
        assert!(matches!(err, GateRejection::NotReadOnly(_)));
    }
}
