//! Response Synthesizer
//!
//! Turns a result set back into prose. Empty results short-circuit to a fixed
//! phrasing without touching the inference capability, which keeps the common
//! "nothing matched" case deterministic and testable offline.

use crate::db::display_value;
use crate::error::{AgentError, Result};
use crate::executor::ResultSet;
use crate::llm::Inference;
use std::sync::Arc;
use tracing::debug;

/// Deterministic answer for empty result sets.
pub const NO_DATA_ANSWER: &str = "No data found matching your question.";

pub struct ResponseSynthesizer {
    inference: Arc<dyn Inference>,
}

impl ResponseSynthesizer {
    pub fn new(inference: Arc<dyn Inference>) -> Self {
        Self { inference }
    }

    /// The executed query is passed for grounding only; the instructions
    /// keep the model on the provided data instead of its own knowledge.
    pub async fn synthesize(
        &self,
        question: &str,
        sql: &str,
        results: &ResultSet,
    ) -> Result<String> {
        if results.is_empty() {
            debug!("empty result set, returning canned no-data answer");
            return Ok(NO_DATA_ANSWER.to_string());
        }

        let system = "You are a helpful assistant that explains SQL query results in natural language.\n\n\
                      Given the user's original question and the SQL results, provide a clear, concise answer.\n\
                      Use ONLY the provided data - never your own knowledge.\n\
                      Do not show the SQL query to the user.\n\
                      Be conversational and helpful in your response.";

        let user = format!(
            "User question: {}\n\nSQL query used: {}\n\n{}",
            question,
            sql,
            render_results(results)
        );

        let answer = self
            .inference
            .infer(system, &user)
            .await
            .map_err(|e| AgentError::Synthesis(e.to_string()))?;

        Ok(answer.trim().trim_start_matches("ANSWER:").trim().to_string())
    }

    /// Canned answer derived directly from the raw result set, used when
    /// synthesis fails. Never exposes an error to the user.
    pub fn fallback_answer(results: &ResultSet) -> String {
        if results.is_empty() {
            return NO_DATA_ANSWER.to_string();
        }
        if results.total_rows == 1 && results.columns.len() == 1 {
            return format!("The result is {}.", display_value(&results.rows[0][0]));
        }
        let first = render_row(results, 0);
        format!(
            "The query returned {} rows. The first is: {}.",
            results.total_rows, first
        )
    }
}

fn render_results(results: &ResultSet) -> String {
    let mut lines = vec!["SQL Query Results:".to_string()];
    for (idx, _) in results.rows.iter().enumerate() {
        lines.push(format!("{}. {}", idx + 1, render_row(results, idx)));
    }
    if results.truncated {
        lines.push(format!(
            "... ({} more rows)",
            results.total_rows - results.rows.len()
        ));
    }
    lines.join("\n")
}

fn render_row(results: &ResultSet, idx: usize) -> String {
    results
        .columns
        .iter()
        .zip(results.rows[idx].iter())
        .map(|(column, value)| format!("{}: {}", column, display_value(value)))
        .collect::<Vec<_>>()
        .join(", ")
}
