//! Error types for Quarry.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("Agent error: {0}")]
    Agent(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Intent error: {0}")]
    Intent(String),

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QuarryError>;
