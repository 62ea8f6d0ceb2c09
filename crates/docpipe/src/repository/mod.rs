//! Repository contract for jobs and the source records they depend on.
//!
//! `update` is a compare-and-write on the job's `version`: the write only
//! lands if nobody else wrote the row since it was read. That is what makes
//! `Job::start` a claim across concurrent deliveries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;
use crate::job::{Job, JobKind};

pub mod memory;

pub use memory::MemoryJobRepository;

/// Upstream document a download job fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub name: Option<String>,
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Source {0} not found")]
    SourceNotFound(i64),

    #[error("Job {id} was modified concurrently (expected version {expected})")]
    Conflict { id: i64, expected: i64 },

    #[error("Stored job {id} is unreadable: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Job, RepositoryError>;

    /// Writes `job` if the stored version still equals `job.version()`.
    /// Returns the stored copy (version bumped, `updated_at` refreshed).
    async fn update(&self, job: &Job) -> Result<Job, RepositoryError>;

    /// Returns the job of `kind` for `parent_id`, creating a pending one if
    /// none exists yet. Safe to call again for the same parent.
    async fn find_or_create(&self, kind: JobKind, parent_id: i64) -> Result<Job, RepositoryError>;

    async fn get_source(&self, id: i64) -> Result<Source, RepositoryError>;

    /// Completed jobs whose next-stage announcement was never published.
    async fn list_unpublished(&self, kind: JobKind, limit: usize)
        -> Result<Vec<Job>, RepositoryError>;
}
