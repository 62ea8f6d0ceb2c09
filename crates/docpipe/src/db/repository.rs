use async_trait::async_trait;
use chrono::Utc;

use super::job_repo::{self, JobRow, UpdateOutcome};
use super::{Database, DatabaseError};
use crate::job::{Job, JobKind, JobStatus, DEFAULT_MAX_ATTEMPTS};
use crate::repository::{JobRepository, RepositoryError, Source};

/// [`JobRepository`] backed by SQLite. Each call runs on tokio's blocking
/// pool so the connection mutex never stalls an async worker.
#[derive(Clone)]
pub struct SqliteJobRepository {
    db: Database,
}

impl SqliteJobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn insert_source(&self, url: &str, name: Option<&str>) -> Result<Source, RepositoryError> {
        let url = url.to_string();
        let name = name.map(str::to_string);
        self.blocking(move |db| job_repo::insert_source(db, &url, name.as_deref()))
            .await
    }

    pub async fn count_by_status(&self, status: JobStatus) -> Result<u64, RepositoryError> {
        self.blocking(move |db| job_repo::count_by_status(db, status.as_str()))
            .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DatabaseError::Task(e.to_string()))?
            .map_err(|e| {
                if e.is_busy() {
                    RepositoryError::Unavailable(e.to_string())
                } else {
                    RepositoryError::from(e)
                }
            })
    }
}

fn to_job(row: JobRow) -> Result<Job, RepositoryError> {
    let id = row.id;
    row.into_record()
        .map(|record| Job::from_record(record, DEFAULT_MAX_ATTEMPTS))
        .map_err(|reason| RepositoryError::Corrupt { id, reason })
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn get(&self, id: i64) -> Result<Job, RepositoryError> {
        let row = self.blocking(move |db| job_repo::find_by_id(db, id)).await?;
        to_job(row.ok_or(RepositoryError::JobNotFound(id))?)
    }

    async fn update(&self, job: &Job) -> Result<Job, RepositoryError> {
        let next = job.next_revision(Utc::now());
        let mut row = JobRow::from_record(&next.to_record()).map_err(|e| RepositoryError::Corrupt {
            id: job.id(),
            reason: e.to_string(),
        })?;
        // The WHERE clause matches on the version the caller read.
        row.version = job.version();

        let outcome = self
            .blocking(move |db| job_repo::compare_and_update(db, &row))
            .await?;
        match outcome {
            UpdateOutcome::Updated => Ok(next),
            UpdateOutcome::Stale => Err(RepositoryError::Conflict {
                id: job.id(),
                expected: job.version(),
            }),
            UpdateOutcome::Missing => Err(RepositoryError::JobNotFound(job.id())),
        }
    }

    async fn find_or_create(&self, kind: JobKind, parent_id: i64) -> Result<Job, RepositoryError> {
        let row = self
            .blocking(move |db| job_repo::insert_or_get(db, kind, parent_id))
            .await?;
        to_job(row)
    }

    async fn get_source(&self, id: i64) -> Result<Source, RepositoryError> {
        self.blocking(move |db| job_repo::find_source(db, id))
            .await?
            .ok_or(RepositoryError::SourceNotFound(id))
    }

    async fn list_unpublished(
        &self,
        kind: JobKind,
        limit: usize,
    ) -> Result<Vec<Job>, RepositoryError> {
        let rows = self
            .blocking(move |db| job_repo::list_unpublished(db, kind, limit as u64))
            .await?;
        rows.into_iter().map(to_job).collect()
    }
}
