//! Query Generator
//!
//! Sends the user question plus the rendered schema description to the
//! inference capability and extracts a candidate query with a relevance
//! signal. The relevance signal shows up in several shapes in the wild, so
//! detection is an explicit union of strategies: a structured field, the
//! `IRRELEVANT_QUERY` sentinel inside the query text, and an "I don't know"
//! marker in the free-text rationale. Any strategy signalling unanswerable
//! routes the question to the refusal path.

use crate::error::{AgentError, Result};
use crate::llm::{extract_json, strip_fences, Inference};
use crate::schema::SchemaDescription;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Sentinel the model is told to emit in place of a query when the question
/// cannot be answered from the schema.
pub const IRRELEVANT_SENTINEL: &str = "IRRELEVANT_QUERY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    Answerable,
    Unanswerable,
}

/// Candidate produced by the generator; consumed by the safety gate.
#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub sql: String,
    pub relevance: Relevance,
    pub rationale: Option<String>,
}

/// Structured shape requested from the inference capability. Field aliases
/// absorb the naming drift models exhibit.
#[derive(Debug, Deserialize)]
struct RawGeneration {
    #[serde(alias = "sql_query", alias = "query")]
    sql: Option<String>,
    relevance: Option<String>,
    #[serde(alias = "explanation")]
    rationale: Option<String>,
}

pub struct QueryGenerator {
    inference: Arc<dyn Inference>,
}

impl QueryGenerator {
    pub fn new(inference: Arc<dyn Inference>) -> Self {
        Self { inference }
    }

    /// One inference call, no internal retries; failures belong to the
    /// pipeline's generation-failure path.
    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaDescription,
    ) -> Result<GeneratedQuery> {
        let system = build_system_prompt(schema);
        let response = self.inference.infer(&system, question).await?;
        if response.trim().is_empty() {
            return Err(AgentError::Generation(
                "inference returned an empty response".to_string(),
            ));
        }

        let candidate = parse_generation(&response)?;
        debug!(
            relevance = ?candidate.relevance,
            "candidate query generated"
        );
        Ok(candidate)
    }
}

fn build_system_prompt(schema: &SchemaDescription) -> String {
    format!(
        r#"You are a SQL expert working with a SQLite database.

Convert the user's question into a single SQLite SELECT query.

Database schema:
{}

Rules:
1. Generate exactly one SELECT statement - never INSERT, UPDATE, DELETE, or any DDL
2. Be careful with table and column names (case-sensitive)
3. Use proper JOIN syntax when needed
4. Limit results to reasonable numbers (use LIMIT if needed)
5. If the question cannot be answered from this schema, set relevance to "unanswerable" and put {} in the sql field instead of inventing a query

Return ONLY valid JSON in this exact format, no markdown, no extra text:
{{"sql": "SELECT ...", "relevance": "answerable" or "unanswerable", "rationale": "brief explanation"}}"#,
        schema.render(),
        IRRELEVANT_SENTINEL
    )
}

fn parse_generation(response: &str) -> Result<GeneratedQuery> {
    let (sql, relevance_field, rationale) =
        match serde_json::from_str::<RawGeneration>(&extract_json(response)) {
            Ok(raw) => (raw.sql.unwrap_or_default(), raw.relevance, raw.rationale),
            // Not JSON at all: treat the whole response as raw query text,
            // the way the non-structured model variants answer.
            Err(_) => (strip_fences(response).to_string(), None, None),
        };

    let relevance = detect_relevance(relevance_field.as_deref(), &sql, rationale.as_deref());

    if relevance == Relevance::Answerable && sql.trim().is_empty() {
        return Err(AgentError::Generation(
            "inference returned no query text".to_string(),
        ));
    }

    Ok(GeneratedQuery {
        sql: sql.trim().to_string(),
        relevance,
        rationale,
    })
}

fn detect_relevance(field: Option<&str>, sql: &str, rationale: Option<&str>) -> Relevance {
    if let Some(field) = field {
        if field.eq_ignore_ascii_case("unanswerable") {
            return Relevance::Unanswerable;
        }
    }
    if sql.contains(IRRELEVANT_SENTINEL) {
        return Relevance::Unanswerable;
    }
    if let Some(rationale) = rationale {
        let lowered = rationale.to_lowercase();
        if lowered.contains("don't know") || lowered.contains("cannot be answered") {
            return Relevance::Unanswerable;
        }
    }
    Relevance::Answerable
}
