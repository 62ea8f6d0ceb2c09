//! In-process repository with the same compare-and-write rules as the
//! SQLite one. Used for local wiring and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{JobRepository, RepositoryError, Source};
use crate::job::{Job, JobKind, JobRecord, JobStatus, DEFAULT_MAX_ATTEMPTS};

#[derive(Default)]
struct State {
    jobs: HashMap<i64, JobRecord>,
    sources: HashMap<i64, Source>,
    next_job_id: i64,
    next_source_id: i64,
}

/// Cloning is cheap and clones share the same rows.
#[derive(Clone, Default)]
pub struct MemoryJobRepository {
    state: Arc<Mutex<State>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository lock poisoned".to_string()))
    }

    pub fn insert_source(&self, url: &str, name: Option<&str>) -> Result<Source, RepositoryError> {
        let mut state = self.lock()?;
        state.next_source_id += 1;
        let source = Source {
            id: state.next_source_id,
            url: url.to_string(),
            name: name.map(str::to_string),
        };
        state.sources.insert(source.id, source.clone());
        Ok(source)
    }

    pub fn insert_job(&self, kind: JobKind, parent_id: i64) -> Result<Job, RepositoryError> {
        let mut state = self.lock()?;
        state.next_job_id += 1;
        let job = Job::new(state.next_job_id, kind, parent_id);
        state.jobs.insert(job.id(), job.to_record());
        Ok(job)
    }

    /// Stores a record as-is, replacing any row with the same id.
    pub fn put_record(&self, record: JobRecord) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        state.next_job_id = state.next_job_id.max(record.id);
        state.jobs.insert(record.id, record);
        Ok(())
    }

    pub fn record(&self, id: i64) -> Option<JobRecord> {
        self.lock().ok()?.jobs.get(&id).cloned()
    }

    pub fn jobs_of_kind(&self, kind: JobKind) -> Vec<JobRecord> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut jobs: Vec<JobRecord> = state
            .jobs
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        jobs.sort_by_key(|r| r.id);
        jobs
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn get(&self, id: i64) -> Result<Job, RepositoryError> {
        let state = self.lock()?;
        state
            .jobs
            .get(&id)
            .cloned()
            .map(|r| Job::from_record(r, DEFAULT_MAX_ATTEMPTS))
            .ok_or(RepositoryError::JobNotFound(id))
    }

    async fn update(&self, job: &Job) -> Result<Job, RepositoryError> {
        let mut state = self.lock()?;
        let stored = state
            .jobs
            .get(&job.id())
            .ok_or(RepositoryError::JobNotFound(job.id()))?;
        if stored.version != job.version() {
            return Err(RepositoryError::Conflict {
                id: job.id(),
                expected: job.version(),
            });
        }

        let next = job.next_revision(Utc::now());
        state.jobs.insert(next.id(), next.to_record());
        Ok(next)
    }

    async fn find_or_create(&self, kind: JobKind, parent_id: i64) -> Result<Job, RepositoryError> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .jobs
            .values()
            .find(|r| r.kind == kind && r.parent_id == parent_id)
        {
            return Ok(Job::from_record(existing.clone(), DEFAULT_MAX_ATTEMPTS));
        }

        state.next_job_id += 1;
        let job = Job::new(state.next_job_id, kind, parent_id);
        state.jobs.insert(job.id(), job.to_record());
        Ok(job)
    }

    async fn get_source(&self, id: i64) -> Result<Source, RepositoryError> {
        let state = self.lock()?;
        state
            .sources
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::SourceNotFound(id))
    }

    async fn list_unpublished(
        &self,
        kind: JobKind,
        limit: usize,
    ) -> Result<Vec<Job>, RepositoryError> {
        let state = self.lock()?;
        let mut jobs: Vec<JobRecord> = state
            .jobs
            .values()
            .filter(|r| {
                r.kind == kind && r.status == JobStatus::Completed && r.published_at.is_none()
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|r| r.id);
        Ok(jobs
            .into_iter()
            .take(limit)
            .map(|r| Job::from_record(r, DEFAULT_MAX_ATTEMPTS))
            .collect())
    }
}
