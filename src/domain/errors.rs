// src/domain/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Data parse error: {0}")]
    Parse(String),

    #[error("Missing field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Order error: {0}")]
    Order(String),

    #[error("Balance error: {0}")]
    Balance(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("API error: {0}")]
    Api(String),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(e: rusqlite::Error) -> Self {
        PersistenceError::Database(e.to_string())
    }
}

// Result type aliases for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type FeedResult<T> = Result<T, FeedError>;
pub type ExecutionResult<T> = Result<T, ExecutionError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;
