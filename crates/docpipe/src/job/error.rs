use thiserror::Error;

use super::JobStatus;

/// Rejected state-machine transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Job is already completed")]
    AlreadyCompleted,

    #[error("Job is already in progress")]
    AlreadyInProgress,

    #[error("Job has used all {max_attempts} attempts")]
    MaxAttemptsExceeded { max_attempts: u32 },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: JobStatus, to: JobStatus },

    #[error("Job is not in progress (status: {0})")]
    NotInProgress(JobStatus),

    #[error("Required result field '{0}' is empty")]
    MissingResultField(&'static str),

    #[error("Result kind '{result}' does not match job kind '{job}'")]
    ResultKindMismatch {
        job: &'static str,
        result: &'static str,
    },
}

impl JobError {
    /// Conflicts caused by a duplicate or concurrent delivery rather than a
    /// real failure. The consumer acknowledges these.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, JobError::AlreadyCompleted | JobError::AlreadyInProgress)
    }
}
