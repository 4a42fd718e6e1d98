//! Pipeline Controller
//!
//! The staged state machine behind `answer()`: generate a candidate query,
//! gate it, execute it, synthesize prose from the rows. Every stage-local
//! failure is converted into a terminal outcome here; nothing escapes as an
//! error to the caller.

use crate::executor::StatementExecutor;
use crate::generator::QueryGenerator;
use crate::llm::Inference;
use crate::safety::{GateRejection, SafetyGate};
use crate::schema::SchemaDescription;
use crate::synthesizer::ResponseSynthesizer;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fixed refusal shown for irrelevant questions, failed generation, and
/// gated-out queries. Deliberately never includes the rejected statement.
pub const REFUSAL_ANSWER: &str = "I don't know the answer to that question. \
     I can only answer questions about the data in this database.";

/// Shown when a validated query still fails at the engine. The raw engine
/// error is logged, never forwarded.
pub const EXECUTION_FAILURE_ANSWER: &str =
    "I couldn't find an answer to that question in the database.";

/// Where the state machine stopped. Observability only; callers just need
/// the answer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStage {
    Answered,
    RefusedIrrelevant,
    RefusedInvalid,
    FailedExecution,
    FailedGeneration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub answer: String,
    pub stage: TerminalStage,
}

impl PipelineOutcome {
    fn refused(stage: TerminalStage) -> Self {
        Self {
            answer: REFUSAL_ANSWER.to_string(),
            stage,
        }
    }
}

/// One pipeline per process; invocations share only the immutable schema
/// description and the executor's connection, so they can run concurrently.
pub struct QueryPipeline {
    schema: Arc<SchemaDescription>,
    generator: QueryGenerator,
    executor: Arc<dyn StatementExecutor>,
    synthesizer: ResponseSynthesizer,
}

impl QueryPipeline {
    pub fn new(
        schema: Arc<SchemaDescription>,
        inference: Arc<dyn Inference>,
        executor: Arc<dyn StatementExecutor>,
    ) -> Self {
        Self {
            schema,
            generator: QueryGenerator::new(Arc::clone(&inference)),
            executor,
            synthesizer: ResponseSynthesizer::new(inference),
        }
    }

    /// The single entry point external callers need. Always returns an
    /// outcome; a caller wanting retry re-invokes with the same question.
    pub async fn answer(&self, question: &str) -> PipelineOutcome {
        let request_id = Uuid::new_v4();
        info!(%request_id, question, "pipeline start");

        // Start -> Generating
        let candidate = match self.generator.generate(question, &self.schema).await {
            Ok(candidate) => candidate,
            Err(e) => {
                // Operationally indistinguishable from "cannot help": same
                // refusal text, distinct terminal stage.
                warn!(%request_id, error = %e, "query generation failed");
                return PipelineOutcome::refused(TerminalStage::FailedGeneration);
            }
        };

        // Generating -> Validating | Refused(irrelevant)
        let validated = match SafetyGate::validate(candidate) {
            Ok(validated) => validated,
            Err(GateRejection::MarkedUnanswerable) => {
                info!(%request_id, "question marked unanswerable");
                return PipelineOutcome::refused(TerminalStage::RefusedIrrelevant);
            }
            Err(rejection) => {
                // The rejected statement stays out of the user-visible answer.
                warn!(%request_id, %rejection, "candidate query rejected");
                return PipelineOutcome::refused(TerminalStage::RefusedInvalid);
            }
        };

        // Validating -> Executing
        let results = match self.executor.execute(&validated) {
            Ok(results) => results,
            Err(e) => {
                warn!(%request_id, error = %e, "query execution failed");
                return PipelineOutcome {
                    answer: EXECUTION_FAILURE_ANSWER.to_string(),
                    stage: TerminalStage::FailedExecution,
                };
            }
        };
        debug!(
            %request_id,
            rows = results.rows.len(),
            total_rows = results.total_rows,
            truncated = results.truncated,
            "query executed"
        );

        // Executing -> Synthesizing -> Done. Synthesis failures downgrade to
        // a canned answer derived from the rows, never a pipeline failure.
        let answer = match self
            .synthesizer
            .synthesize(question, validated.sql(), &results)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!(%request_id, error = %e, "synthesis failed, using fallback answer");
                ResponseSynthesizer::fallback_answer(&results)
            }
        };

        info!(%request_id, "pipeline done");
        PipelineOutcome {
            answer,
            stage: TerminalStage::Answered,
        }
    }
}
