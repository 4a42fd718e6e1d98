use anyhow::{Context, Result};
use askdb::config::AgentConfig;
use askdb::db::{SqliteStore, CHINOOK_SQL_URL};
use askdb::executor::SqliteExecutor;
use askdb::llm::LlmClient;
use askdb::pipeline::QueryPipeline;
use askdb::schema::SchemaDescription;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "askdb")]
#[command(about = "Ask natural-language questions about a SQLite database")]
struct Args {
    /// Question to answer; starts an interactive session when omitted
    question: Option<String>,

    /// Path to an existing SQLite database file (in-memory when omitted)
    #[arg(long)]
    db: Option<PathBuf>,

    /// SQL script that creates and populates the dataset
    #[arg(long)]
    schema_sql: Option<PathBuf>,

    /// URL of the dataset definition script (default: the Chinook database)
    #[arg(long)]
    schema_url: Option<String>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Model identifier for query generation and answer synthesis
    #[arg(long)]
    model: Option<String>,

    /// Maximum result rows retained before truncation
    #[arg(long)]
    max_rows: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = AgentConfig::from_env();
    if let Some(api_key) = args.api_key {
        config.api_key = api_key;
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(max_rows) = args.max_rows {
        config.max_result_rows = max_rows;
    }

    // One shared connection for the process lifetime.
    let store = match &args.db {
        Some(path) => SqliteStore::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?,
        None => SqliteStore::open_in_memory()?,
    };

    // Bulk load, unless an already-populated database file was given.
    if let Some(script) = &args.schema_sql {
        store
            .load_script_file(script)
            .with_context(|| format!("failed to load dataset script {}", script.display()))?;
    } else if args.db.is_none() {
        let url = args.schema_url.as_deref().unwrap_or(CHINOOK_SQL_URL);
        store
            .load_script_url(url)
            .await
            .context("failed to load dataset script")?;
    }

    // Fatal when the schema cannot be described: no request can proceed.
    let schema = SchemaDescription::introspect(&store, config.sample_rows_per_table)
        .context("cannot start without a schema description")?;
    info!(tables = schema.tables.len(), "ready");

    let store = Arc::new(store);
    let inference = Arc::new(LlmClient::new(&config)?);
    let executor = Arc::new(SqliteExecutor::new(store, config.max_result_rows)?);
    let pipeline = QueryPipeline::new(schema, inference, executor);

    match args.question {
        Some(question) => {
            let outcome = pipeline.answer(&question).await;
            println!("{}", outcome.answer);
        }
        None => interactive(&pipeline).await?,
    }

    Ok(())
}

async fn interactive(pipeline: &QueryPipeline) -> Result<()> {
    println!("Ask questions about the database. Type 'quit' to exit.");
    let stdin = std::io::stdin();
    loop {
        print!("\nYour question: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }

        let outcome = pipeline.answer(question).await;
        println!("Answer: {}", outcome.answer);
    }
    Ok(())
}
