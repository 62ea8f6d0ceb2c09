//! The two job kinds the executor drives.
//!
//! A stage resolves what its job depends on, performs the side effect and
//! says what to announce once the job is recorded as completed. Claiming,
//! recording outcomes and publishing stay in the executor.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::error::StepError;
use crate::downloader::{normalize_content_type, Downloader, DEFAULT_CONTENT_TYPE};
use crate::job::{DownloadOutput, Job, JobKind, JobOutput, ProcessOutput};
use crate::processor::ProcessorRegistry;
use crate::queue::OutboundMessage;
use crate::repository::{JobRepository, RepositoryError};
use crate::sanitize::redact_url;
use crate::storage::{ContentStore, ObjectMetadata};

pub const PROCESS_REQUESTED: &str = "process.requested";
pub const EXTRACT_REQUESTED: &str = "extract.requested";

const FALLBACK_EXTENSION: &str = "bin";
const PROCESSED_CONTENT_TYPE: &str = "text/plain";

/// A message for the next stage and the queue it goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub queue: String,
    pub message: OutboundMessage,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Resolves the job's dependencies and performs its side effect. Must be
    /// safe to repeat: a retried attempt may redo work a failed one did.
    async fn resolve_and_perform(&self, job: &Job) -> Result<JobOutput, StepError>;

    /// Builds the next-stage record (idempotently) and its announcement.
    async fn next_stage(&self, job: &Job) -> Result<Announcement, RepositoryError>;
}

fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Extension from the last path segment of `url`, if it looks like one.
fn url_extension(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or("");
    let (_, segment) = path.rsplit_once('/')?;
    let (_, ext) = segment.rsplit_once('.')?;

    let valid = !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

/// Prefers the URL's extension when it agrees with the content type (or the
/// server sent no useful type), then the content type's registered
/// extension, then `bin`.
fn file_extension(url: &str, content_type: &str) -> String {
    if let Some(ext) = url_extension(url) {
        let agrees = mime_guess::from_ext(&ext)
            .iter()
            .any(|mime| mime.essence_str() == content_type);
        let known = mime_guess::from_ext(&ext).first_raw().is_some();
        if agrees || (content_type == DEFAULT_CONTENT_TYPE && known) {
            return ext;
        }
    }

    if content_type == DEFAULT_CONTENT_TYPE {
        return FALLBACK_EXTENSION.to_string();
    }
    mime_guess::get_mime_extensions_str(content_type)
        .and_then(|exts| exts.first())
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Fetches a source document and stores it under `downloads/{job_id}.{ext}`.
pub struct DownloadStage {
    repository: Arc<dyn JobRepository>,
    downloader: Arc<dyn Downloader>,
    store: Arc<dyn ContentStore>,
    process_queue: String,
}

impl DownloadStage {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        downloader: Arc<dyn Downloader>,
        store: Arc<dyn ContentStore>,
        process_queue: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            downloader,
            store,
            process_queue: process_queue.into(),
        }
    }
}

#[async_trait]
impl Stage for DownloadStage {
    fn kind(&self) -> JobKind {
        JobKind::Download
    }

    async fn resolve_and_perform(&self, job: &Job) -> Result<JobOutput, StepError> {
        let source = self.repository.get_source(job.parent_id()).await?;
        debug!(source_id = source.id, url = %redact_url(&source.url), "resolved source");

        let fetched = self.downloader.fetch(&source.url).await?;

        let fetched_type = normalize_content_type(&fetched.content_type);
        let extension = file_extension(&source.url, &fetched_type);
        let content_type = if fetched_type == DEFAULT_CONTENT_TYPE {
            mime_guess::from_ext(&extension)
                .first_raw()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string()
        } else {
            fetched_type
        };
        let hash = content_hash(&fetched.content);
        let key = format!("downloads/{}.{}", job.id(), extension);

        let mut metadata = ObjectMetadata::new(&content_type, &hash)
            .with("source_id", source.id.to_string());
        if let Some(name) = &source.name {
            metadata = metadata.with("source_name", name);
        }
        self.store.put(&key, &fetched.content, &metadata).await?;

        info!(key = %key, size_bytes = fetched.content.len(), content_type = %content_type, "stored download");

        Ok(JobOutput::Download(DownloadOutput {
            storage_path: key,
            content_hash: hash,
            file_extension: extension,
            content_type,
            size_bytes: fetched.content.len() as u64,
        }))
    }

    async fn next_stage(&self, job: &Job) -> Result<Announcement, RepositoryError> {
        let process_job = self
            .repository
            .find_or_create(JobKind::Process, job.id())
            .await?;

        Ok(Announcement {
            queue: self.process_queue.clone(),
            message: OutboundMessage::new(PROCESS_REQUESTED, process_job.id()),
        })
    }
}

/// Turns a completed download into normalized text under
/// `processed/{job_id}.txt`.
pub struct ProcessStage {
    repository: Arc<dyn JobRepository>,
    store: Arc<dyn ContentStore>,
    processors: Arc<ProcessorRegistry>,
    extract_queue: String,
}

impl ProcessStage {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        store: Arc<dyn ContentStore>,
        processors: Arc<ProcessorRegistry>,
        extract_queue: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            store,
            processors,
            extract_queue: extract_queue.into(),
        }
    }

    async fn completed_download(&self, job: &Job) -> Result<DownloadOutput, StepError> {
        let parent = self.repository.get(job.parent_id()).await?;
        if parent.kind() != JobKind::Download {
            return Err(StepError::Dependency(format!(
                "parent job {} is a {} job",
                parent.id(),
                parent.kind()
            )));
        }

        match parent.output() {
            Some(JobOutput::Download(output)) if parent.is_completed() => Ok(output.clone()),
            _ => Err(StepError::Dependency(format!(
                "download job {} is {}",
                parent.id(),
                parent.status()
            ))),
        }
    }
}

#[async_trait]
impl Stage for ProcessStage {
    fn kind(&self) -> JobKind {
        JobKind::Process
    }

    async fn resolve_and_perform(&self, job: &Job) -> Result<JobOutput, StepError> {
        let download = self.completed_download(job).await?;
        debug!(storage_path = %download.storage_path, "resolved download");

        let raw = self.store.get(&download.storage_path).await?;
        let processed = self.processors.process(&raw, &download.content_type)?;

        let text = processed.text.into_bytes();
        let hash = content_hash(&text);
        let key = format!("processed/{}.txt", job.id());
        let metadata = ObjectMetadata::new(PROCESSED_CONTENT_TYPE, &hash)
            .with("source_type", processed.source_type)
            .with("download_path", &download.storage_path);
        self.store.put(&key, &text, &metadata).await?;

        info!(key = %key, size_bytes = text.len(), "stored processed text");

        Ok(JobOutput::Process(ProcessOutput {
            output_path: key,
            content_hash: hash,
            size_bytes: text.len() as u64,
        }))
    }

    async fn next_stage(&self, job: &Job) -> Result<Announcement, RepositoryError> {
        Ok(Announcement {
            queue: self.extract_queue.clone(),
            message: OutboundMessage::new(EXTRACT_REQUESTED, job.id()),
        })
    }
}
