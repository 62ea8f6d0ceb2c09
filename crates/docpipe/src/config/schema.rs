use serde::{Deserialize, Serialize};

use crate::guard::{DEFAULT_MAX_CLOCK_SKEW_SECS, DEFAULT_MAX_MESSAGE_AGE_SECS};
use crate::job::DEFAULT_MAX_ATTEMPTS;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    /// Attempts a job gets before it is permanently failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_message_age_secs")]
    pub max_message_age_secs: u64,
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
    /// Backoff for retries inside one attempt (downloads, publishes).
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
    /// Budget for recording a failure after the attempt was cancelled.
    #[serde(default = "default_fail_persist_timeout_ms")]
    pub fail_persist_timeout_ms: u64,
    #[serde(default = "default_reconcile_batch_size")]
    pub reconcile_batch_size: usize,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_max_message_age_secs() -> u64 {
    DEFAULT_MAX_MESSAGE_AGE_SECS
}

fn default_max_clock_skew_secs() -> u64 {
    DEFAULT_MAX_CLOCK_SKEW_SECS
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_download_timeout_secs() -> u64 {
    30
}

fn default_max_download_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_fail_persist_timeout_ms() -> u64 {
    5_000
}

fn default_reconcile_batch_size() -> usize {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            max_attempts: default_max_attempts(),
            max_message_age_secs: default_max_message_age_secs(),
            max_clock_skew_secs: default_max_clock_skew_secs(),
            retry: RetryPolicy::default(),
            batch: BatchConfig::default(),
            queues: QueueConfig::default(),
            storage_root: default_storage_root(),
            database_path: None,
            download_timeout_secs: default_download_timeout_secs(),
            max_download_bytes: default_max_download_bytes(),
            fail_persist_timeout_ms: default_fail_persist_timeout_ms(),
            reconcile_batch_size: default_reconcile_batch_size(),
        }
    }
}

/// How a batch reports item failures back to the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Report failed item ids; only those get redelivered.
    #[default]
    PartialFailure,
    /// Stop at the first failure and fail the whole call.
    AllOrNothing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub mode: BatchMode,
    /// Items processed concurrently in partial-failure mode.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    8
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            mode: BatchMode::default(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_process_queue")]
    pub process: String,
    #[serde(default = "default_extract_queue")]
    pub extract: String,
}

fn default_process_queue() -> String {
    "document-process".to_string()
}

fn default_extract_queue() -> String {
    "document-extract".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            process: default_process_queue(),
            extract: default_extract_queue(),
        }
    }
}
