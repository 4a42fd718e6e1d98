use crate::executor::ExecutionError;
use crate::safety::GateRejection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("Query generation failed: {0}")]
    Generation(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Answer synthesis failed: {0}")]
    Synthesis(String),

    #[error("Query rejected: {0}")]
    Gate(#[from] GateRejection),

    #[error("Query execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
