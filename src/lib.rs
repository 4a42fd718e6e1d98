pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod generator;
pub mod llm;
pub mod pipeline;
pub mod safety;
pub mod schema;
pub mod synthesizer;
