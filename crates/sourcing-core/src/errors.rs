use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourcingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job context: {0}")]
    InvalidJobContext(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("SERP provider error: {0}")]
    Serp(String),

    #[error("LLM provider error: {0}")]
    Llm(String),

    #[error("LLM call timed out after {0} ms")]
    LlmTimeout(u64),

    #[error("Callback delivery failed: {0}")]
    Callback(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Request not found: {0}")]
    RequestNotFound(uuid::Uuid),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SourcingError>;
