use thiserror::Error;

pub type GuardResult<T> = Result<T, GuardError>;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Rollout percentage {0} is out of range (expected 0-100)")]
    InvalidRange(i64),

    #[error("Feature flag not found: {0}")]
    FlagNotFound(String),

    #[error("Rollback trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("No rollout plan configured for flag: {0}")]
    NoPlanConfigured(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rollback action failed: {0}")]
    ActionExecution(String),

    #[error("Health probe error: {0}")]
    Probe(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
