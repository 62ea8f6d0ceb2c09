use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::error::{PipelineError, StepError};
use super::stage::Stage;
use crate::config::PipelineConfig;
use crate::job::{Job, JobError};
use crate::queue::{PublishError, QueuePublisher};
use crate::repository::{JobRepository, RepositoryError};
use crate::retry::RetryPolicy;

/// How a delivery was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// This call claimed the job, ran the side effect and announced the next stage.
    Completed { job_id: i64, attempt: u32 },
    /// The job was already done; nothing changed.
    AlreadyCompleted { job_id: i64 },
    /// The job was already done but its announcement had not gone out.
    Republished { job_id: i64 },
}

/// Object-safe entry point the consumers drive.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        job_id: i64,
    ) -> Result<StepOutcome, PipelineError>;
}

/// Runs one stage for one job id. Concurrent deliveries for the same job
/// are serialized by the claim: only one compare-and-write of `start()` can
/// land, the rest see `AlreadyInProgress`.
pub struct StepExecutor<S: Stage> {
    stage: S,
    repository: Arc<dyn JobRepository>,
    publisher: Arc<dyn QueuePublisher>,
    max_attempts: u32,
    publish_retry: RetryPolicy,
    fail_persist_timeout: Duration,
    reconcile_batch_size: usize,
}

impl<S: Stage> StepExecutor<S> {
    pub fn new(
        stage: S,
        repository: Arc<dyn JobRepository>,
        publisher: Arc<dyn QueuePublisher>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            stage,
            repository,
            publisher,
            max_attempts: config.max_attempts,
            publish_retry: config.retry.clone(),
            fail_persist_timeout: Duration::from_millis(config.fail_persist_timeout_ms),
            reconcile_batch_size: config.reconcile_batch_size,
        }
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    async fn run(&self, cancel: &CancellationToken, job_id: i64) -> Result<StepOutcome, PipelineError> {
        // Step 1: Load
        let job = cancellable(cancel, job_id, self.repository.get(job_id))
            .instrument(info_span!("load"))
            .await?
            .map_err(|source| match source {
                RepositoryError::JobNotFound(_) => PipelineError::JobNotFound(job_id),
                source => PipelineError::Repository { job_id, source },
            })?
            .with_max_attempts(self.max_attempts);

        if job.kind() != self.stage.kind() {
            return Err(PipelineError::WrongStage {
                job_id,
                expected: self.stage.kind(),
                found: job.kind(),
            });
        }

        // Step 2: Already done
        if job.is_completed() {
            if job.needs_publish() {
                info!("completed job was never announced, republishing");
                self.announce(cancel, job).await?;
                return Ok(StepOutcome::Republished { job_id });
            }
            debug!("job already completed");
            return Ok(StepOutcome::AlreadyCompleted { job_id });
        }

        // Step 3+4: Claim
        let claimed = self
            .claim(cancel, job)
            .instrument(info_span!("claim"))
            .await?;
        let attempt = claimed.attempt_count();

        // Step 5+6: Resolve and perform
        let performed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled { job_id }),
            result = self.stage.resolve_and_perform(&claimed).instrument(info_span!("perform", attempt)) => {
                result.map_err(|source| self.step_failed(&claimed, source))
            }
        };
        let output = match performed {
            Ok(output) => output,
            // Step 7
            Err(e) => return Err(self.record_failure(&claimed, e).await),
        };

        // Step 8: Record completion. Not raced against cancellation since the
        // side effect has already happened.
        let mut completed = claimed.clone();
        if let Err(e) = completed.complete(output) {
            let err = self.step_failed(&claimed, StepError::InvalidResult(e));
            return Err(self.record_failure(&claimed, err).await);
        }
        let stored = self
            .repository
            .update(&completed)
            .instrument(info_span!("complete"))
            .await
            .map_err(|e| PipelineError::Critical {
                job_id,
                reason: format!("side effect finished but completion was not recorded: {}", e),
            })?;
        info!(attempt, "job completed");

        // Step 9: Announce
        self.announce(cancel, stored).await?;
        Ok(StepOutcome::Completed { job_id, attempt })
    }

    async fn claim(&self, cancel: &CancellationToken, job: Job) -> Result<Job, PipelineError> {
        let job_id = job.id();
        if let Some(blocker) = job.start_blocker() {
            return Err(PipelineError::State {
                job_id,
                source: blocker,
            });
        }

        let mut claimed = job;
        claimed
            .start()
            .map_err(|source| PipelineError::State { job_id, source })?;

        match cancellable(cancel, job_id, self.repository.update(&claimed)).await? {
            Ok(stored) => {
                debug!(attempt = stored.attempt_count(), "claimed");
                Ok(stored)
            }
            Err(RepositoryError::Conflict { .. }) => Err(PipelineError::State {
                job_id,
                source: JobError::AlreadyInProgress,
            }),
            Err(source) => Err(PipelineError::Repository { job_id, source }),
        }
    }

    fn step_failed(&self, job: &Job, source: StepError) -> PipelineError {
        PipelineError::StepFailed {
            job_id: job.id(),
            kind: job.kind(),
            attempt: job.attempt_count(),
            source,
        }
    }

    /// Persists `Failed` for a claimed job and hands `err` back, or a
    /// critical error if the failure itself could not be recorded.
    async fn record_failure(&self, claimed: &Job, err: PipelineError) -> PipelineError {
        let job_id = claimed.id();
        let message = match &err {
            PipelineError::StepFailed { source, .. } => source.to_string(),
            PipelineError::Cancelled { .. } => "attempt cancelled".to_string(),
            other => other.to_string(),
        };

        let mut failed = claimed.clone();
        if let Err(e) = failed.fail(message) {
            return PipelineError::Critical {
                job_id,
                reason: format!("{} (could not mark failed: {})", err, e),
            };
        }

        let persisted = tokio::time::timeout(self.fail_persist_timeout, self.repository.update(&failed))
            .instrument(info_span!("record_failure"))
            .await;
        match persisted {
            Ok(Ok(stored)) => {
                warn!(
                    attempt = stored.attempt_count(),
                    attempts_remaining = stored.attempts_remaining(),
                    error = %err,
                    "attempt failed"
                );
                err
            }
            Ok(Err(e)) => PipelineError::Critical {
                job_id,
                reason: format!("{} (failure was not recorded: {})", err, e),
            },
            Err(_) => PipelineError::Critical {
                job_id,
                reason: format!(
                    "{} (recording the failure timed out after {:?})",
                    err, self.fail_persist_timeout
                ),
            },
        }
    }

    /// Publishes the next-stage announcement for a completed job and sets
    /// its `published_at` marker.
    async fn announce(&self, cancel: &CancellationToken, job: Job) -> Result<(), PipelineError> {
        let job_id = job.id();
        let span = info_span!("announce");

        let announcement = cancellable(cancel, job_id, self.stage.next_stage(&job))
            .instrument(span.clone())
            .await?
            .map_err(|source| PipelineError::Repository { job_id, source })?;

        let publish = self.publish_retry.run(
            |_| self.publisher.publish(&announcement.queue, &announcement.message),
            PublishError::is_retryable,
        );
        cancellable(cancel, job_id, publish)
            .instrument(span.clone())
            .await?
            .map_err(|source| PipelineError::PublishFailed { job_id, source })?;

        info!(
            queue = %announcement.queue,
            event_type = %announcement.message.event_type,
            next_job_id = announcement.message.job_id,
            "announced next stage"
        );

        let mut marked = job;
        marked.mark_published();
        if let Err(e) = self.repository.update(&marked).instrument(span).await {
            // The sweep may announce again; consumers treat that as a duplicate.
            warn!(error = %e, "announcement sent but publish marker was not recorded");
        }
        Ok(())
    }

    /// Republishes announcements for completed jobs of this stage whose
    /// publish never landed. Returns how many were announced.
    pub async fn reconcile_unpublished(&self, cancel: &CancellationToken) -> Result<usize, PipelineError> {
        let kind = self.stage.kind();
        let span = info_span!("reconcile", kind = %kind);

        let pending = self
            .repository
            .list_unpublished(kind, self.reconcile_batch_size)
            .instrument(span.clone())
            .await
            .map_err(|source| PipelineError::Repository { job_id: 0, source })?;

        let mut announced = 0;
        for job in pending {
            if cancel.is_cancelled() {
                break;
            }
            let job_id = job.id();
            let job = job.with_max_attempts(self.max_attempts);
            match self
                .announce(cancel, job)
                .instrument(info_span!(parent: &span, "pipeline", job_id, kind = %kind))
                .await
            {
                Ok(()) => announced += 1,
                Err(e) => warn!(job_id, error = %e, "reconciliation publish failed"),
            }
        }

        if announced > 0 {
            info!(kind = %kind, announced, "reconciled unpublished jobs");
        }
        Ok(announced)
    }
}

#[async_trait]
impl<S: Stage> Executor for StepExecutor<S> {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        job_id: i64,
    ) -> Result<StepOutcome, PipelineError> {
        let span = info_span!("pipeline", job_id, kind = %self.stage.kind());
        self.run(cancel, job_id).instrument(span).await
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    job_id: i64,
    fut: impl Future<Output = T>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled { job_id }),
        value = fut => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{DownloadOutput, JobKind, JobOutput, JobStatus};
    use crate::pipeline::stage::Announcement;
    use crate::queue::{MemoryPublisher, OutboundMessage};
    use crate::consumer::{classify, ItemOutcome, OutcomeCode};
    use crate::repository::{MemoryJobRepository, Source};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stage that succeeds or fails on demand and counts side effects.
    struct ScriptedStage {
        fail: bool,
        hang: bool,
        performed: AtomicUsize,
    }

    impl ScriptedStage {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                hang: false,
                performed: AtomicUsize::new(0),
            }
        }

        /// Never finishes; only cancellation gets the executor out.
        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::new(false)
            }
        }
    }

    /// How the Nth `update` misbehaves.
    #[derive(Clone, Copy)]
    enum UpdateFault {
        Fail,
        Stall,
    }

    /// Memory repository whose `update` number `on_call` (1-based) fails or
    /// never returns.
    struct FaultyRepository {
        inner: MemoryJobRepository,
        fault: UpdateFault,
        on_call: usize,
        updates: AtomicUsize,
    }

    #[async_trait]
    impl JobRepository for FaultyRepository {
        async fn get(&self, id: i64) -> Result<Job, RepositoryError> {
            self.inner.get(id).await
        }

        async fn update(&self, job: &Job) -> Result<Job, RepositoryError> {
            let call = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.on_call {
                match self.fault {
                    UpdateFault::Fail => {
                        return Err(RepositoryError::Unavailable("disk full".to_string()))
                    }
                    UpdateFault::Stall => std::future::pending::<()>().await,
                }
            }
            self.inner.update(job).await
        }

        async fn find_or_create(&self, kind: JobKind, parent_id: i64) -> Result<Job, RepositoryError> {
            self.inner.find_or_create(kind, parent_id).await
        }

        async fn get_source(&self, id: i64) -> Result<Source, RepositoryError> {
            self.inner.get_source(id).await
        }

        async fn list_unpublished(
            &self,
            kind: JobKind,
            limit: usize,
        ) -> Result<Vec<Job>, RepositoryError> {
            self.inner.list_unpublished(kind, limit).await
        }
    }

    /// Executor whose second `update` (the one after the claim) misbehaves.
    fn faulty_executor(
        stage: ScriptedStage,
        fault: UpdateFault,
    ) -> (StepExecutor<ScriptedStage>, MemoryJobRepository, MemoryPublisher) {
        let repo = MemoryJobRepository::new();
        let publisher = MemoryPublisher::new();
        let faulty = FaultyRepository {
            inner: repo.clone(),
            fault,
            on_call: 2,
            updates: AtomicUsize::new(0),
        };
        let config = PipelineConfig {
            fail_persist_timeout_ms: 50,
            ..config()
        };
        let executor = StepExecutor::new(stage, Arc::new(faulty), Arc::new(publisher.clone()), &config);
        (executor, repo, publisher)
    }

    fn assert_critical(err: &PipelineError) {
        assert!(matches!(err, PipelineError::Critical { .. }), "got {:?}", err);
        assert!(matches!(
            classify(err),
            ItemOutcome::Failure {
                code: OutcomeCode::CriticalInconsistency,
                ..
            }
        ));
    }

    #[async_trait]
    impl Stage for ScriptedStage {
        fn kind(&self) -> JobKind {
            JobKind::Download
        }

        async fn resolve_and_perform(&self, job: &Job) -> Result<JobOutput, StepError> {
            self.performed.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(StepError::Dependency("source offline".to_string()));
            }
            Ok(JobOutput::Download(DownloadOutput {
                storage_path: format!("downloads/{}.pdf", job.id()),
                content_hash: "abc".to_string(),
                file_extension: "pdf".to_string(),
                content_type: "application/pdf".to_string(),
                size_bytes: 3,
            }))
        }

        async fn next_stage(&self, job: &Job) -> Result<Announcement, RepositoryError> {
            Ok(Announcement {
                queue: "next".to_string(),
                message: OutboundMessage::new("process.requested", job.id() + 1000),
            })
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            retry: RetryPolicy::no_retry(),
            ..PipelineConfig::default()
        }
    }

    fn executor(
        fail: bool,
    ) -> (StepExecutor<ScriptedStage>, MemoryJobRepository, MemoryPublisher) {
        let repo = MemoryJobRepository::new();
        let publisher = MemoryPublisher::new();
        let executor = StepExecutor::new(
            ScriptedStage::new(fail),
            Arc::new(repo.clone()),
            Arc::new(publisher.clone()),
            &config(),
        );
        (executor, repo, publisher)
    }

    #[tokio::test]
    async fn test_success_completes_and_announces() {
        let (executor, repo, publisher) = executor(false);
        let job = repo.insert_job(JobKind::Download, 1).unwrap();

        let outcome = executor
            .execute(&CancellationToken::new(), job.id())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Completed {
                job_id: job.id(),
                attempt: 1
            }
        );
        let record = repo.record(job.id()).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.published_at.is_some());
        assert_eq!(publisher.messages("next").len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let (executor, repo, publisher) = executor(true);
        let job = repo.insert_job(JobKind::Download, 1).unwrap();

        let err = executor
            .execute(&CancellationToken::new(), job.id())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::StepFailed { attempt: 1, .. }));
        let record = repo.record(job.id()).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempt_count, 1);
        assert!(record.error_message.unwrap().contains("source offline"));
        assert_eq!(publisher.total(), 0);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let (executor, _, _) = executor(false);
        assert!(matches!(
            executor.execute(&CancellationToken::new(), 9).await,
            Err(PipelineError::JobNotFound(9))
        ));
    }

    #[tokio::test]
    async fn test_wrong_stage_is_rejected_without_mutation() {
        let (executor, repo, _) = executor(false);
        let job = repo.insert_job(JobKind::Process, 1).unwrap();

        assert!(matches!(
            executor.execute(&CancellationToken::new(), job.id()).await,
            Err(PipelineError::WrongStage { .. })
        ));
        assert_eq!(repo.record(job.id()).unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_claim_changes_nothing() {
        let (executor, repo, _) = executor(false);
        let job = repo.insert_job(JobKind::Download, 1).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            executor.execute(&cancel, job.id()).await,
            Err(PipelineError::Cancelled { .. })
        ));
        let record = repo.record(job.id()).unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(executor.stage().performed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_completion_and_redelivery_republishes() {
        let (executor, repo, publisher) = executor(false);
        let job = repo.insert_job(JobKind::Download, 1).unwrap();
        publisher.fail_next(1);

        let err = executor
            .execute(&CancellationToken::new(), job.id())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PublishFailed { .. }));

        let record = repo.record(job.id()).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.published_at.is_none());

        let outcome = executor
            .execute(&CancellationToken::new(), job.id())
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Republished { job_id: job.id() });
        assert_eq!(publisher.messages("next").len(), 1);
        assert_eq!(executor.stage().performed.load(Ordering::SeqCst), 1);

        let again = executor
            .execute(&CancellationToken::new(), job.id())
            .await
            .unwrap();
        assert_eq!(again, StepOutcome::AlreadyCompleted { job_id: job.id() });
        assert_eq!(publisher.messages("next").len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_unpublished() {
        let (executor, repo, publisher) = executor(false);
        let first = repo.insert_job(JobKind::Download, 1).unwrap();
        let second = repo.insert_job(JobKind::Download, 2).unwrap();
        publisher.fail_next(2);

        for id in [first.id(), second.id()] {
            assert!(executor.execute(&CancellationToken::new(), id).await.is_err());
        }
        assert_eq!(publisher.total(), 0);

        let announced = executor
            .reconcile_unpublished(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(announced, 2);
        assert_eq!(publisher.messages("next").len(), 2);
        assert_eq!(
            executor
                .reconcile_unpublished(&CancellationToken::new())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_unrecorded_completion_is_critical() {
        let (executor, repo, publisher) = faulty_executor(ScriptedStage::new(false), UpdateFault::Fail);
        let job = repo.insert_job(JobKind::Download, 1).unwrap();

        let err = executor
            .execute(&CancellationToken::new(), job.id())
            .await
            .unwrap_err();

        assert_critical(&err);
        assert_eq!(executor.stage().performed.load(Ordering::SeqCst), 1);
        assert_eq!(repo.record(job.id()).unwrap().status, JobStatus::InProgress);
        assert_eq!(publisher.total(), 0);
    }

    #[tokio::test]
    async fn test_unrecorded_failure_is_critical() {
        let (executor, repo, _) = faulty_executor(ScriptedStage::new(true), UpdateFault::Fail);
        let job = repo.insert_job(JobKind::Download, 1).unwrap();

        let err = executor
            .execute(&CancellationToken::new(), job.id())
            .await
            .unwrap_err();

        assert_critical(&err);
        assert!(err.to_string().contains("failure was not recorded"));
        assert_eq!(repo.record(job.id()).unwrap().status, JobStatus::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_failure_write_times_out_as_critical() {
        let (executor, repo, _) = faulty_executor(ScriptedStage::new(true), UpdateFault::Stall);
        let job = repo.insert_job(JobKind::Download, 1).unwrap();

        let err = executor
            .execute(&CancellationToken::new(), job.id())
            .await
            .unwrap_err();

        assert_critical(&err);
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_after_claim_records_failure() {
        let repo = MemoryJobRepository::new();
        let executor = StepExecutor::new(
            ScriptedStage::hanging(),
            Arc::new(repo.clone()),
            Arc::new(MemoryPublisher::new()),
            &config(),
        );
        let job = repo.insert_job(JobKind::Download, 1).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = executor.execute(&cancel, job.id()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { .. }));
        assert_eq!(executor.stage().performed.load(Ordering::SeqCst), 1);

        let record = repo.record(job.id()).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.error_message.as_deref(), Some("attempt cancelled"));
    }
}
