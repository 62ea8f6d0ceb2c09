use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::JobError;

/// Attempts allowed per job unless the configuration says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Message stored when a failure is recorded without any text.
const UNSPECIFIED_FAILURE: &str = "unspecified failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// The stage a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Download,
    Process,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Process => "process",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(JobKind::Download),
            "process" => Ok(JobKind::Process),
            other => Err(format!("unknown job kind '{}'", other)),
        }
    }
}

/// Result of a finished download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutput {
    /// Object store key the raw content was written to.
    pub storage_path: String,
    /// Hex-encoded SHA-256 of the content.
    pub content_hash: String,
    /// Extension derived from the content type (without the dot).
    pub file_extension: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Result of a finished processing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub output_path: String,
    pub content_hash: String,
    pub size_bytes: u64,
}

/// Kind-specific result fields, written only on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobOutput {
    Download(DownloadOutput),
    Process(ProcessOutput),
}

impl JobOutput {
    pub fn kind(&self) -> JobKind {
        match self {
            JobOutput::Download(_) => JobKind::Download,
            JobOutput::Process(_) => JobKind::Process,
        }
    }

    fn validate(&self) -> Result<(), JobError> {
        let required: Vec<(&'static str, &str)> = match self {
            JobOutput::Download(d) => vec![
                ("storage_path", d.storage_path.as_str()),
                ("content_hash", d.content_hash.as_str()),
                ("file_extension", d.file_extension.as_str()),
            ],
            JobOutput::Process(p) => vec![
                ("output_path", p.output_path.as_str()),
                ("content_hash", p.content_hash.as_str()),
            ],
        };

        match required.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(JobError::MissingResultField(name)),
            None => Ok(()),
        }
    }
}

/// Plain persisted shape of a job, used by repository adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub kind: JobKind,
    pub parent_id: i64,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub error_message: Option<String>,
    pub output: Option<JobOutput>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub version: i64,
}

/// A unit of work moving through `Pending -> InProgress -> Completed | Failed`.
///
/// Fields are only reachable through the transition methods below, so a job
/// loaded from the repository can only change status along the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: i64,
    kind: JobKind,
    parent_id: i64,
    status: JobStatus,
    attempt_count: u32,
    max_attempts: u32,
    error_message: Option<String>,
    output: Option<JobOutput>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    version: i64,
}

impl Job {
    /// A fresh pending job, as a repository creates it.
    pub fn new(id: i64, kind: JobKind, parent_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            parent_id,
            status: JobStatus::Pending,
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            error_message: None,
            output: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            published_at: None,
            version: 0,
        }
    }

    /// Rebuilds a job from its persisted shape. `max_attempts` is policy and
    /// is supplied by the caller.
    pub fn from_record(record: JobRecord, max_attempts: u32) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            parent_id: record.parent_id,
            status: record.status,
            attempt_count: record.attempt_count,
            max_attempts,
            error_message: record.error_message.filter(|m| !m.is_empty()),
            output: record.output,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            updated_at: record.updated_at,
            published_at: record.published_at,
            version: record.version,
        }
    }

    pub fn to_record(&self) -> JobRecord {
        JobRecord {
            id: self.id,
            kind: self.kind,
            parent_id: self.parent_id,
            status: self.status,
            attempt_count: self.attempt_count,
            error_message: self.error_message.clone(),
            output: self.output.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
            published_at: self.published_at,
            version: self.version,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The copy a repository stores after a successful compare-and-write.
    pub fn next_revision(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = now;
        next
    }

    pub fn can_start(&self) -> bool {
        match self.status {
            JobStatus::Pending => self.attempt_count < self.max_attempts,
            JobStatus::Failed => self.attempt_count < self.max_attempts,
            JobStatus::InProgress | JobStatus::Completed => false,
        }
    }

    /// Claims the job for a new attempt.
    pub fn start(&mut self) -> Result<(), JobError> {
        match self.status {
            JobStatus::Completed => return Err(JobError::AlreadyCompleted),
            JobStatus::InProgress => return Err(JobError::AlreadyInProgress),
            JobStatus::Pending | JobStatus::Failed => {}
        }
        if self.attempt_count >= self.max_attempts {
            return Err(JobError::MaxAttemptsExceeded {
                max_attempts: self.max_attempts,
            });
        }

        self.status = JobStatus::InProgress;
        self.started_at = Some(Utc::now());
        self.attempt_count += 1;
        self.error_message = None;
        Ok(())
    }

    pub fn complete(&mut self, output: JobOutput) -> Result<(), JobError> {
        if self.status != JobStatus::InProgress {
            return Err(JobError::InvalidStateTransition {
                from: self.status,
                to: JobStatus::Completed,
            });
        }
        if output.kind() != self.kind {
            return Err(JobError::ResultKindMismatch {
                job: self.kind.as_str(),
                result: output.kind().as_str(),
            });
        }
        output.validate()?;

        self.status = JobStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
        self.error_message = None;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), JobError> {
        match self.status {
            JobStatus::Completed => return Err(JobError::AlreadyCompleted),
            JobStatus::InProgress => {}
            other => return Err(JobError::NotInProgress(other)),
        }

        let message = message.into();
        self.status = JobStatus::Failed;
        self.error_message = Some(if message.trim().is_empty() {
            UNSPECIFIED_FAILURE.to_string()
        } else {
            message
        });
        Ok(())
    }

    /// Records that the next-stage announcement went out.
    pub fn mark_published(&mut self) {
        if self.status == JobStatus::Completed {
            self.published_at = Some(Utc::now());
        }
    }

    /// Error explaining why `can_start` is false, if it is.
    pub fn start_blocker(&self) -> Option<JobError> {
        match self.status {
            JobStatus::Completed => Some(JobError::AlreadyCompleted),
            JobStatus::InProgress => Some(JobError::AlreadyInProgress),
            _ if self.attempt_count >= self.max_attempts => Some(JobError::MaxAttemptsExceeded {
                max_attempts: self.max_attempts,
            }),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    pub fn should_retry(&self) -> bool {
        self.is_failed() && self.attempt_count < self.max_attempts
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }

    pub fn needs_publish(&self) -> bool {
        self.is_completed() && self.published_at.is_none()
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn parent_id(&self) -> i64 {
        self.parent_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn output(&self) -> Option<&JobOutput> {
        self.output.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    pub fn version(&self) -> i64 {
        self.version
    }
}
