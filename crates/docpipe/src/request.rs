//! The canonical inbound message envelope.
//!
//! Every transport (batch event, queue consumer, HTTP ingress) turns its raw
//! payload into an [`InboundRequest`] before anything else looks at it.
//! Parsing only rejects payloads that are not an envelope at all; missing or
//! zero values are left for the freshness guard to reject.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Epoch values above this are read as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Payload is not a valid envelope: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    /// Unique per producer-emitted event.
    pub event_id: String,
    /// Stage/intent discriminator, e.g. `download.requested`.
    pub event_type: String,
    pub job_id: i64,
    /// Producer-assigned creation time. `None` when absent or zero.
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundRequest {
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        job_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            job_id,
            timestamp: Some(timestamp),
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self, RequestError> {
        let raw: RawEnvelope = serde_json::from_slice(payload)?;
        let timestamp = match raw.timestamp {
            Some(ts) => ts.resolve()?,
            None => None,
        };

        Ok(Self {
            event_id: raw.event_id.trim().to_string(),
            event_type: raw.event_type,
            job_id: raw.job_id.unwrap_or(0),
            timestamp,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default, alias = "eventId")]
    event_id: String,
    #[serde(default, alias = "eventType")]
    event_type: String,
    #[serde(default, alias = "jobId", alias = "download_id", alias = "process_id")]
    job_id: Option<i64>,
    #[serde(default)]
    timestamp: Option<RawTimestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(i64),
    Text(String),
}

impl RawTimestamp {
    fn resolve(self) -> Result<Option<DateTime<Utc>>, RequestError> {
        match self {
            RawTimestamp::Epoch(0) => Ok(None),
            RawTimestamp::Epoch(value) => from_epoch(value)
                .map(Some)
                .ok_or_else(|| RequestError::InvalidTimestamp(value.to_string())),
            RawTimestamp::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(None);
                }
                if let Ok(value) = text.parse::<i64>() {
                    return RawTimestamp::Epoch(value).resolve();
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| Some(dt.with_timezone(&Utc)))
                    .map_err(|_| RequestError::InvalidTimestamp(text.to_string()))
            }
        }
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}
