//! Delivery-driven consumption: parse, guard, execute, acknowledge.
//!
//! [`BatchConsumer`] serves batch-event triggers (serverless style),
//! [`SingleConsumer`] serves broker subscriptions with per-message
//! acknowledgement. Both share [`Handler`], and both treat a state conflict
//! (another delivery already owns or finished the job) as success.

pub mod batch;
pub mod single;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::guard::FreshnessGuard;
use crate::job::{JobError, JobKind};
use crate::pipeline::{Executor, PipelineError};
use crate::request::InboundRequest;

pub use batch::{BatchConsumer, BatchError, BatchItemFailure, BatchOutcome, BatchResponse};
pub use single::{Ack, SingleConsumer};

/// One message as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-level identifier reported back on failure.
    pub id: String,
    pub body: Vec<u8>,
    /// Whether the broker has handed this message out before.
    pub redelivered: bool,
}

impl Delivery {
    pub fn new(id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            redelivered: false,
        }
    }

    pub fn redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeCode {
    InvalidPayload,
    ValidationError,
    DownloadFailed,
    ProcessingError,
    MaxAttemptsExceeded,
    NotFound,
    CriticalInconsistency,
}

impl OutcomeCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeCode::InvalidPayload => "INVALID_PAYLOAD",
            OutcomeCode::ValidationError => "VALIDATION_ERROR",
            OutcomeCode::DownloadFailed => "DOWNLOAD_FAILED",
            OutcomeCode::ProcessingError => "PROCESSING_ERROR",
            OutcomeCode::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
            OutcomeCode::NotFound => "NOT_FOUND",
            OutcomeCode::CriticalInconsistency => "CRITICAL_INCONSISTENCY",
        }
    }

    /// Whether redelivering the same message could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OutcomeCode::DownloadFailed
                | OutcomeCode::ProcessingError
                | OutcomeCode::CriticalInconsistency
        )
    }

    /// Status an HTTP ingress answers with for this outcome.
    pub fn http_status(&self) -> u16 {
        match self {
            OutcomeCode::InvalidPayload => 400,
            OutcomeCode::ValidationError => 422,
            OutcomeCode::NotFound => 404,
            OutcomeCode::MaxAttemptsExceeded => 409,
            OutcomeCode::DownloadFailed => 502,
            OutcomeCode::ProcessingError | OutcomeCode::CriticalInconsistency => 500,
        }
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    Failure { code: OutcomeCode, message: String },
}

impl ItemOutcome {
    fn failure(code: OutcomeCode, message: impl Into<String>) -> Self {
        ItemOutcome::Failure {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ItemOutcome::Failure { code, .. } if code.is_retryable())
    }

    pub fn code(&self) -> Option<OutcomeCode> {
        match self {
            ItemOutcome::Success => None,
            ItemOutcome::Failure { code, .. } => Some(*code),
        }
    }

    pub fn http_status(&self) -> u16 {
        self.code().map_or(200, |code| code.http_status())
    }
}

/// Maps an executor error to what the transport should be told.
pub fn classify(err: &PipelineError) -> ItemOutcome {
    let code = match err {
        _ if err.is_state_conflict() => return ItemOutcome::Success,
        PipelineError::JobNotFound(_) => OutcomeCode::NotFound,
        PipelineError::State {
            source: JobError::MaxAttemptsExceeded { .. },
            ..
        } => OutcomeCode::MaxAttemptsExceeded,
        PipelineError::State { .. } | PipelineError::WrongStage { .. } => {
            OutcomeCode::ValidationError
        }
        PipelineError::StepFailed {
            kind: JobKind::Download,
            ..
        } => OutcomeCode::DownloadFailed,
        PipelineError::StepFailed { .. }
        | PipelineError::Repository { .. }
        | PipelineError::PublishFailed { .. }
        | PipelineError::Cancelled { .. } => OutcomeCode::ProcessingError,
        PipelineError::Critical { .. } => OutcomeCode::CriticalInconsistency,
    };
    ItemOutcome::failure(code, err.to_string())
}

/// Parse, guard and execute one message body. The guard runs before the
/// executor, so a rejected message never reaches the repository.
#[derive(Clone)]
pub struct Handler {
    guard: FreshnessGuard,
    executor: Arc<dyn Executor>,
}

impl Handler {
    pub fn new(executor: Arc<dyn Executor>, guard: FreshnessGuard) -> Self {
        Self { guard, executor }
    }

    pub async fn handle(&self, cancel: &CancellationToken, body: &[u8]) -> ItemOutcome {
        let request = match InboundRequest::parse(body) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "rejecting unparseable message");
                return ItemOutcome::failure(OutcomeCode::InvalidPayload, e.to_string());
            }
        };

        if let Err(e) = self.guard.check(&request) {
            warn!(
                event_id = %request.event_id,
                job_id = request.job_id,
                error = %e,
                "rejecting message"
            );
            return ItemOutcome::failure(OutcomeCode::ValidationError, e.to_string());
        }

        match self.executor.execute(cancel, request.job_id).await {
            Ok(outcome) => {
                debug!(event_id = %request.event_id, ?outcome, "message handled");
                ItemOutcome::Success
            }
            Err(e) => {
                let outcome = classify(&e);
                log_failure(&request, &e, &outcome);
                outcome
            }
        }
    }
}

fn log_failure(request: &InboundRequest, err: &PipelineError, outcome: &ItemOutcome) {
    let event_id = request.event_id.as_str();
    let job_id = err.job_id();
    match outcome.code() {
        None => debug!(event_id, job_id, reason = %err, "duplicate delivery ignored"),
        Some(OutcomeCode::CriticalInconsistency) => {
            error!(critical = true, event_id, job_id, error = %err, "job state is inconsistent")
        }
        Some(OutcomeCode::MaxAttemptsExceeded) => {
            error!(event_id, job_id, error = %err, "job exhausted its attempts")
        }
        Some(code) => warn!(event_id, job_id, code = %code, error = %err, "message failed"),
    }
}
