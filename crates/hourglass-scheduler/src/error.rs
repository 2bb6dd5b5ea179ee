use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded into a job.
    #[error("Corrupt job record {id}: {reason}")]
    CorruptRecord { id: i64, reason: String },

    /// Another thread panicked while holding the connection lock.
    #[error("Job store unavailable: connection lock poisoned")]
    LockPoisoned,

    /// Malformed or missing request input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Trigger policy fields failed their own validation.
    #[error("Invalid schedule config: {0}")]
    InvalidConfig(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    NotFound { id: i64 },

    /// The request tried to change a field fixed at creation.
    #[error("Field '{field}' cannot be changed after creation")]
    ImmutableField { field: &'static str },

    /// A task executor reported a failure.
    #[error("{0}")]
    Execution(String),

    /// A task executor did not finish within the execution timeout.
    #[error("Execution timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl SchedulerError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::CorruptRecord { .. } => "CORRUPT_RECORD",
            SchedulerError::LockPoisoned => "STORE_UNAVAILABLE",
            SchedulerError::Validation(_) => "VALIDATION_ERROR",
            SchedulerError::InvalidConfig(_) => "INVALID_CONFIG",
            SchedulerError::NotFound { .. } => "NOT_FOUND",
            SchedulerError::ImmutableField { .. } => "IMMUTABLE_FIELD",
            SchedulerError::Execution(_) => "EXECUTION_ERROR",
            SchedulerError::Timeout { .. } => "EXECUTION_TIMEOUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
