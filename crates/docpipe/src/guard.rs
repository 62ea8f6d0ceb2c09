//! Freshness guard for inbound requests.
//!
//! Filters malformed or expired requests before the repository is touched.
//! Duplicate suppression is left to the job state machine: a second delivery
//! for a job that is already claimed or completed is stopped by `can_start`.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::request::InboundRequest;

pub const DEFAULT_MAX_MESSAGE_AGE_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 5 * 60;

/// Largest window a `chrono::Duration` can hold at millisecond precision.
pub const MAX_WINDOW_SECS: u64 = (i64::MAX / 1000) as u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("event_id is empty")]
    MissingEventId,

    #[error("job id must be positive, got {0}")]
    InvalidJobId(i64),

    #[error("timestamp is missing or zero")]
    MissingTimestamp,

    #[error("message is {age_secs}s old, older than the {max_age_secs}s limit")]
    Stale { age_secs: i64, max_age_secs: i64 },

    #[error("message timestamp is {ahead_secs}s in the future")]
    FromTheFuture { ahead_secs: i64 },
}

#[derive(Debug, Clone)]
pub struct FreshnessGuard {
    max_age: Duration,
    max_skew: Duration,
}

impl Default for FreshnessGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_AGE_SECS, DEFAULT_MAX_CLOCK_SKEW_SECS)
    }
}

impl FreshnessGuard {
    pub fn new(max_age_secs: u64, max_skew_secs: u64) -> Self {
        Self {
            max_age: Duration::seconds(clamp_secs(max_age_secs)),
            max_skew: Duration::seconds(clamp_secs(max_skew_secs)),
        }
    }

    pub fn check(&self, request: &InboundRequest) -> Result<(), GuardError> {
        self.check_at(request, Utc::now())
    }

    pub fn check_at(&self, request: &InboundRequest, now: DateTime<Utc>) -> Result<(), GuardError> {
        if request.event_id.is_empty() {
            return Err(GuardError::MissingEventId);
        }
        if request.job_id <= 0 {
            return Err(GuardError::InvalidJobId(request.job_id));
        }
        let timestamp = request.timestamp.ok_or(GuardError::MissingTimestamp)?;
        if timestamp.timestamp() == 0 {
            return Err(GuardError::MissingTimestamp);
        }

        let age = now - timestamp;
        if age > self.max_age {
            return Err(GuardError::Stale {
                age_secs: age.num_seconds(),
                max_age_secs: self.max_age.num_seconds(),
            });
        }
        if -age > self.max_skew {
            return Err(GuardError::FromTheFuture {
                ahead_secs: (-age).num_seconds(),
            });
        }

        Ok(())
    }
}

fn clamp_secs(secs: u64) -> i64 {
    // Both bounds fit in i64 after the min.
    secs.min(MAX_WINDOW_SECS) as i64
}
