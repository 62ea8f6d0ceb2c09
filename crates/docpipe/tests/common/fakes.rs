//! Test doubles for the pipeline's outer adapters.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use docpipe::downloader::{DownloadError, Downloader, Fetched};
use docpipe::job::{Job, JobKind};
use docpipe::repository::{JobRepository, RepositoryError, Source};

type Scripted = Result<Fetched, DownloadError>;

/// Downloader answering from per-URL scripts. Scripted failures are used up
/// first, then the URL's content is served on every call.
#[derive(Clone, Default)]
pub struct FakeDownloader {
    content: Arc<Mutex<HashMap<String, Fetched>>>,
    failures: Arc<Mutex<HashMap<String, VecDeque<Scripted>>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn serve(&self, url: &str, content: &[u8], content_type: &str) {
        self.content.lock().unwrap().insert(
            url.to_string(),
            Fetched {
                content: content.to_vec(),
                content_type: content_type.to_string(),
            },
        );
    }

    /// The next `times` fetches of `url` fail with a 503.
    pub fn fail(&self, url: &str, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(url.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(Err(DownloadError::Status {
                url: url.to_string(),
                status: 503,
            }));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(&self, url: &str) -> Result<Fetched, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());
        if let Some(result) = scripted {
            return result;
        }

        self.content
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DownloadError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Delegates to another repository and counts `get` calls.
pub struct SpyRepository<R> {
    inner: R,
    gets: AtomicUsize,
}

impl<R> SpyRepository<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
        }
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: JobRepository> JobRepository for SpyRepository<R> {
    async fn get(&self, id: i64) -> Result<Job, RepositoryError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id).await
    }

    async fn update(&self, job: &Job) -> Result<Job, RepositoryError> {
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
