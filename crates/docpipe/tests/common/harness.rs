//! Test harness wiring both stages the way a deployment would, over
//! in-memory adapters that tests can inspect.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};

use docpipe::config::PipelineConfig;
use docpipe::consumer::{BatchConsumer, Delivery, SingleConsumer};
use docpipe::job::{Job, JobKind, JobRecord};
use docpipe::pipeline::{DownloadStage, ProcessStage, StepExecutor};
use docpipe::processor::ProcessorRegistry;
use docpipe::queue::MemoryPublisher;
use docpipe::repository::{MemoryJobRepository, Source};
use docpipe::retry::RetryPolicy;
use docpipe::storage::MemoryStore;

use super::fakes::{FakeDownloader, SpyRepository};

/// Inbound envelope for `job_id`, stamped now.
pub fn message(job_id: i64) -> Vec<u8> {
    message_at(job_id, Utc::now())
}

pub fn message_at(job_id: i64, timestamp: DateTime<Utc>) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event_id": format!("evt-{}", job_id),
        "event_type": "download.requested",
        "job_id": job_id,
        "timestamp": timestamp.to_rfc3339(),
    }))
    .unwrap()
}

pub struct TestHarness {
    pub config: PipelineConfig,
    pub jobs: MemoryJobRepository,
    pub repository: Arc<SpyRepository<MemoryJobRepository>>,
    pub store: MemoryStore,
    pub publisher: MemoryPublisher,
    pub downloader: FakeDownloader,
    pub download: Arc<StepExecutor<DownloadStage>>,
    pub process: Arc<StepExecutor<ProcessStage>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_downloader(FakeDownloader::new())
    }

    pub fn with_downloader(downloader: FakeDownloader) -> Self {
        let config = PipelineConfig {
            retry: RetryPolicy::no_retry(),
            ..PipelineConfig::default()
        };
        let jobs = MemoryJobRepository::new();
        let repository = Arc::new(SpyRepository::new(jobs.clone()));
        let store = MemoryStore::new();
        let publisher = MemoryPublisher::new();

        let download = Arc::new(StepExecutor::new(
            DownloadStage::new(
                repository.clone(),
                Arc::new(downloader.clone()),
                Arc::new(store.clone()),
                config.queues.process.clone(),
            ),
            repository.clone(),
            Arc::new(publisher.clone()),
            &config,
        ));
        let process = Arc::new(StepExecutor::new(
            ProcessStage::new(
                repository.clone(),
                Arc::new(store.clone()),
                Arc::new(ProcessorRegistry::new()),
                config.queues.extract.clone(),
            ),
            repository.clone(),
            Arc::new(publisher.clone()),
            &config,
        ));

        Self {
            config,
            jobs,
            repository,
            store,
            publisher,
            downloader,
            download,
            process,
        }
    }

    /// Registers a source served by the fake downloader and a pending
    /// download job for it.
    pub fn download_job(&self, url: &str, content: &[u8], content_type: &str) -> (Source, Job) {
        self.downloader.serve(url, content, content_type);
        let source = self.jobs.insert_source(url, None).unwrap();
        let job = self.jobs.insert_job(JobKind::Download, source.id).unwrap();
        (source, job)
    }

    /// Like `download_job` but with a fixed job id.
    pub fn download_job_with_id(&self, id: i64, url: &str, content: &[u8], content_type: &str) -> Job {
        self.downloader.serve(url, content, content_type);
        let source = self.jobs.insert_source(url, None).unwrap();
        let job = Job::new(id, JobKind::Download, source.id);
        self.jobs.put_record(job.to_record()).unwrap();
        job
    }

    pub fn record(&self, id: i64) -> JobRecord {
        self.jobs.record(id).unwrap()
    }

    pub fn batch_consumer(&self) -> BatchConsumer {
        BatchConsumer::from_config(self.download.clone(), &self.config)
    }

    pub fn single_consumer(&self) -> SingleConsumer {
        SingleConsumer::from_config(self.download.clone(), &self.config)
    }

    pub fn process_consumer(&self) -> SingleConsumer {
        SingleConsumer::from_config(self.process.clone(), &self.config)
    }

    pub fn delivery(&self, id: &str, job_id: i64) -> Delivery {
        Delivery::new(id, message(job_id))
    }
}
