use askdb::db::SqliteStore;
use askdb::error::{AgentError, Result};
use askdb::executor::{ResultSet, SqliteExecutor, StatementExecutor};
use askdb::llm::Inference;
use askdb::pipeline::{PipelineOutcome, QueryPipeline, TerminalStage, REFUSAL_ANSWER};
use askdb::safety::ValidatedQuery;
use askdb::schema::SchemaDescription;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Inference stub that replays a fixed script of responses.
struct ScriptedInference {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedInference {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Inference for ScriptedInference {
    async fn infer(&self, _system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("inference stub ran out of scripted responses");
        Ok(response)
    }
}

/// Executor wrapper that counts how often the engine is actually reached.
struct CountingExecutor {
    inner: SqliteExecutor,
    calls: AtomicUsize,
}

impl StatementExecutor for CountingExecutor {
    fn execute(
        &self,
        query: &ValidatedQuery,
    ) -> std::result::Result<ResultSet, askdb::executor::ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(query)
    }
}

/// Minimal Chinook-like fixture: an Artist table with 275 rows plus a
/// Customer table.
fn fixture_store() -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .load_script(
            "CREATE TABLE Artist (ArtistId INTEGER PRIMARY KEY, Name NVARCHAR(120));\
             CREATE TABLE Customer (\
                 CustomerId INTEGER PRIMARY KEY,\
                 FirstName NVARCHAR(40) NOT NULL,\
                 Country NVARCHAR(40)\
             );\
             INSERT INTO Artist (ArtistId, Name) \
             WITH RECURSIVE seq(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM seq WHERE x < 275) \
             SELECT x, 'Artist ' || x FROM seq;\
             INSERT INTO Customer VALUES (1, 'John', 'USA'), (2, 'Jane', 'Canada');",
        )
        .unwrap();
    Arc::new(store)
}

fn build_pipeline(inference: Arc<dyn Inference>) -> (QueryPipeline, Arc<CountingExecutor>) {
    let store = fixture_store();
    let schema = SchemaDescription::introspect(&store, 3).unwrap();
    let executor = Arc::new(CountingExecutor {
        inner: SqliteExecutor::new(store, 10).unwrap(),
        calls: AtomicUsize::new(0),
    });
    let pipeline = QueryPipeline::new(
        schema,
        inference,
        Arc::clone(&executor) as Arc<dyn StatementExecutor>,
    );
    (pipeline, executor)
}

#[tokio::test]
async fn answers_count_question_end_to_end() {
    let inference = ScriptedInference::new(&[
        r#"{"sql": "SELECT COUNT(*) AS count FROM Artist", "relevance": "answerable", "rationale": "counts artists"}"#,
        "There are 275 artists in the database.",
    ]);
    let (pipeline, executor) = build_pipeline(Arc::clone(&inference) as Arc<dyn Inference>);

    let outcome = pipeline.answer("How many artists are there?").await;

    assert_eq!(outcome.stage, TerminalStage::Answered);
    assert!(outcome.answer.contains("275"));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    // One generation call plus one synthesis call
    assert_eq!(inference.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn irrelevant_question_is_refused_without_executing() {
    let inference = ScriptedInference::new(&[
        r#"{"sql": "IRRELEVANT_QUERY", "relevance": "unanswerable", "rationale": "weather is not in this schema"}"#,
    ]);
    let (pipeline, executor) = build_pipeline(inference);

    let outcome = pipeline.answer("What's the weather today?").await;

    assert_eq!(outcome.stage, TerminalStage::RefusedIrrelevant);
    assert_eq!(outcome.answer, REFUSAL_ANSWER);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn write_statement_is_refused_without_executing() {
    let inference = ScriptedInference::new(&[
        r#"{"sql": "DELETE FROM Customer", "relevance": "answerable", "rationale": "removes customers"}"#,
    ]);
    let (pipeline, executor) = build_pipeline(inference);

    let outcome = pipeline.answer("Delete all customers").await;

    assert_eq!(outcome.stage, TerminalStage::RefusedInvalid);
    assert_eq!(outcome.answer, REFUSAL_ANSWER);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    // The unsafe statement never leaks into the user-visible answer
    assert!(!outcome.answer.contains("DELETE"));
}

#[tokio::test]
async fn multi_statement_is_refused_without_executing() {
    let inference = ScriptedInference::new(&[
        r#"{"sql": "SELECT COUNT(*) FROM Artist; SELECT COUNT(*) FROM Customer", "relevance": "answerable"}"#,
    ]);
    let (pipeline, executor) = build_pipeline(inference);

    let outcome = pipeline.answer("Count artists and customers").await;

    assert_eq!(outcome.stage, TerminalStage::RefusedInvalid);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_rows_yield_no_data_answer_without_synthesis_call() {
    let inference = ScriptedInference::new(&[
        r#"{"sql": "SELECT Name FROM Artist WHERE Name = 'Nobody'", "relevance": "answerable"}"#,
    ]);
    let (pipeline, executor) = build_pipeline(Arc::clone(&inference) as Arc<dyn Inference>);

    let outcome = pipeline.answer("Is there an artist called Nobody?").await;

    assert_eq!(outcome.stage, TerminalStage::Answered);
    assert_eq!(outcome.answer, askdb::synthesizer::NO_DATA_ANSWER);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    // Generation only; synthesis was short-circuited
    assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn generation_failure_collapses_to_refusal() {
    // An empty inference response is a malformed generation
    let inference = ScriptedInference::new(&["   "]);
    let (pipeline, executor) = build_pipeline(inference);

    let outcome = pipeline.answer("How many artists are there?").await;

    assert_eq!(outcome.stage, TerminalStage::FailedGeneration);
    assert_eq!(outcome.answer, REFUSAL_ANSWER);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

/// Inference stub that produces a valid generation, then errors on every
/// later call, so the synthesis stage fails after execution succeeded.
struct SynthesisOutage {
    calls: AtomicUsize,
    generation: String,
}

#[async_trait]
impl Inference for SynthesisOutage {
    async fn infer(&self, _system: &str, _user: &str) -> Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(self.generation.clone())
        } else {
            Err(AgentError::Inference("connection reset by peer".to_string()))
        }
    }
}

#[tokio::test]
async fn synthesis_failure_downgrades_to_fallback_answer() {
    let inference = Arc::new(SynthesisOutage {
        calls: AtomicUsize::new(0),
        generation:
            r#"{"sql": "SELECT COUNT(*) AS count FROM Artist", "relevance": "answerable"}"#
                .to_string(),
    });
    let (pipeline, executor) = build_pipeline(inference);

    let outcome = pipeline.answer("How many artists are there?").await;

    assert_eq!(outcome.stage, TerminalStage::Answered);
    assert_eq!(outcome.answer, "The result is 275.");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    // The inference error stays in the logs, never in the answer
    assert!(!outcome.answer.contains("connection reset"));
}

#[tokio::test]
async fn execution_failure_yields_generic_answer() {
    // Valid read-only statement against a column that does not exist
    let inference = ScriptedInference::new(&[
        r#"{"sql": "SELECT MissingColumn FROM Artist", "relevance": "answerable"}"#,
    ]);
    let (pipeline, executor) = build_pipeline(inference);

    let outcome = pipeline.answer("Show the missing column").await;

    assert_eq!(outcome.stage, TerminalStage::FailedExecution);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    // Raw engine error text never reaches the user
    assert!(!outcome.answer.contains("MissingColumn"));
    assert!(!outcome.answer.contains("no such column"));
}

#[tokio::test]
async fn identical_stub_responses_yield_identical_outcomes() {
    let script: [&str; 2] = [
        r#"{"sql": "SELECT COUNT(*) AS count FROM Artist", "relevance": "answerable"}"#,
        "There are 275 artists in the database.",
    ];

    let mut outcomes: Vec<PipelineOutcome> = Vec::new();
    for _ in 0..2 {
        let (pipeline, _) = build_pipeline(ScriptedInference::new(&script));
        outcomes.push(pipeline.answer("How many artists are there?").await);
    }

    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[0].stage, TerminalStage::Answered);
}

#[tokio::test]
async fn truncated_results_still_produce_an_answer() {
    let inference = ScriptedInference::new(&[
        r#"{"sql": "SELECT Name FROM Artist ORDER BY ArtistId", "relevance": "answerable"}"#,
        "The first artists are Artist 1 through Artist 10, out of 275 total.",
    ]);
    let (pipeline, executor) = build_pipeline(inference);

    let outcome = pipeline.answer("List all artists").await;

    assert_eq!(outcome.stage, TerminalStage::Answered);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert!(outcome.answer.contains("275"));
}

/// Inference stub that answers generation and synthesis prompts
/// independently, so interleaved invocations cannot steal each
/// other's responses.
struct RoutedInference {
    generation: String,
    synthesis: String,
}

#[async_trait]
impl Inference for RoutedInference {
    async fn infer(&self, _system: &str, user: &str) -> Result<String> {
        if user.contains("SQL Query Results:") {
            Ok(self.synthesis.clone())
        } else {
            Ok(self.generation.clone())
        }
    }
}

#[tokio::test]
async fn concurrent_invocations_share_the_pipeline() {
    let inference = Arc::new(RoutedInference {
        generation:
            r#"{"sql": "SELECT COUNT(*) AS count FROM Artist", "relevance": "answerable"}"#
                .to_string(),
        synthesis: "Counted.".to_string(),
    });
    let store = fixture_store();
    let schema = SchemaDescription::introspect(&store, 3).unwrap();
    let executor = Arc::new(CountingExecutor {
        inner: SqliteExecutor::new(store, 10).unwrap(),
        calls: AtomicUsize::new(0),
    });
    let pipeline = Arc::new(QueryPipeline::new(
        schema,
        inference as Arc<dyn Inference>,
        Arc::clone(&executor) as Arc<dyn StatementExecutor>,
    ));

    let first = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.answer("How many artists?").await }
    });
    let second = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.answer("How many customers?").await }
    });

    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    assert_eq!(first.stage, TerminalStage::Answered);
    assert_eq!(second.stage, TerminalStage::Answered);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
}
