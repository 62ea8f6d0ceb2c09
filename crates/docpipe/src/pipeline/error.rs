use thiserror::Error;

use crate::downloader::DownloadError;
use crate::error::ProcessError;
use crate::job::{JobError, JobKind};
use crate::queue::PublishError;
use crate::repository::RepositoryError;
use crate::storage::StorageError;

/// Why a stage's dependency resolution or side effect failed. Every variant
/// is recorded on the job as its failure message.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Dependency not ready: {0}")]
    Dependency(String),

    #[error("Lookup failed: {0}")]
    Lookup(#[from] RepositoryError),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Processing failed: {0}")]
    Processing(#[from] ProcessError),

    #[error("Stage produced an unusable result: {0}")]
    InvalidResult(JobError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Job {job_id} is a {found} job, not a {expected} job")]
    WrongStage {
        job_id: i64,
        expected: JobKind,
        found: JobKind,
    },

    #[error("Job {job_id}: {source}")]
    State {
        job_id: i64,
        #[source]
        source: JobError,
    },

    #[error("{kind} job {job_id} failed on attempt {attempt}: {source}")]
    StepFailed {
        job_id: i64,
        kind: JobKind,
        attempt: u32,
        #[source]
        source: StepError,
    },

    #[error("Repository error for job {job_id}: {source}")]
    Repository {
        job_id: i64,
        #[source]
        source: RepositoryError,
    },

    /// The side effect ran but its outcome could not be recorded.
    #[error("Critical inconsistency for job {job_id}: {reason}")]
    Critical { job_id: i64, reason: String },

    #[error("Job {job_id} completed but its announcement was not published: {source}")]
    PublishFailed {
        job_id: i64,
        #[source]
        source: PublishError,
    },

    #[error("Job {job_id} was cancelled")]
    Cancelled { job_id: i64 },
}

impl PipelineError {
    pub fn job_id(&self) -> i64 {
        match self {
            PipelineError::JobNotFound(job_id)
            | PipelineError::WrongStage { job_id, .. }
            | PipelineError::State { job_id, .. }
            | PipelineError::StepFailed { job_id, .. }
            | PipelineError::Repository { job_id, .. }
            | PipelineError::Critical { job_id, .. }
            | PipelineError::PublishFailed { job_id, .. }
            | PipelineError::Cancelled { job_id } => *job_id,
        }
    }

    /// Another delivery already owns or finished the job.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, PipelineError::State { source, .. } if source.is_state_conflict())
    }
}
