use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::runner::StepExecutor;
use super::stage::{DownloadStage, ProcessStage};
use crate::config::PipelineConfig;
use crate::db::{default_database_path, Database, SqliteJobRepository};
use crate::downloader::HttpDownloader;
use crate::error::{ConfigError, Result};
use crate::processor::ProcessorRegistry;
use crate::queue::QueuePublisher;
use crate::repository::JobRepository;
use crate::storage::{ContentStore, FilesystemStore};

/// Both stages wired to the production adapters: SQLite jobs, a filesystem
/// object store and the HTTP downloader. The publisher is supplied by the
/// caller since the broker client lives outside this crate.
pub struct Pipelines {
    pub repository: Arc<SqliteJobRepository>,
    pub download: Arc<StepExecutor<DownloadStage>>,
    pub process: Arc<StepExecutor<ProcessStage>>,
}

impl Pipelines {
    pub fn from_config(config: &PipelineConfig, publisher: Arc<dyn QueuePublisher>) -> Result<Self> {
        let db_path = match &config.database_path {
            Some(path) => PathBuf::from(path),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "database_path is not set and no home directory was found".to_string(),
            })?,
        };
        let repository = Arc::new(SqliteJobRepository::new(Database::open(&db_path)?));
        let store: Arc<dyn ContentStore> = Arc::new(FilesystemStore::new(&config.storage_root));
        let downloader = Arc::new(HttpDownloader::new(
            Duration::from_secs(config.download_timeout_secs),
            config.retry.clone(),
            config.max_download_bytes,
        )?);
        let jobs: Arc<dyn JobRepository> = repository.clone();

        let download = StepExecutor::new(
            DownloadStage::new(jobs.clone(), downloader, store.clone(), config.queues.process.clone()),
            jobs.clone(),
            publisher.clone(),
            config,
        );
        let process = StepExecutor::new(
            ProcessStage::new(
                jobs.clone(),
                store,
                Arc::new(ProcessorRegistry::new()),
                config.queues.extract.clone(),
            ),
            jobs,
            publisher,
            config,
        );

        Ok(Self {
            repository,
            download: Arc::new(download),
            process: Arc::new(process),
        })
    }
}
