use thiserror::Error;

use crate::queue::JobState;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job already exists: {0}")]
    AlreadyExists(String),

    /// The item was in the wrong state for the requested transition.
    /// Retryable: a concurrent transition may have raced this one.
    #[error("job {key} is {state}, operation requires {required}")]
    WrongState {
        key: String,
        state: JobState,
        required: &'static str,
    },

    #[error("job {0} has dependent jobs")]
    HasDependents(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
