use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Duplicate job id: {0}")]
    DuplicateJobId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;
