//! Outbound queue contract.
//!
//! Announcements use the same envelope the consumers parse, so the next
//! stage reads them with [`crate::request::InboundRequest::parse`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub event_id: String,
    pub event_type: String,
    pub job_id: i64,
    pub timestamp: String,
}

impl OutboundMessage {
    pub fn new(event_type: impl Into<String>, job_id: i64) -> Self {
        Self::at(event_type, job_id, Utc::now())
    }

    pub fn at(event_type: impl Into<String>, job_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            job_id,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(self).map_err(|e| PublishError::Encode(e.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Queue '{queue}' rejected the message: {reason}")]
    Rejected { queue: String, reason: String },

    #[error("Queue connection unavailable: {0}")]
    Unavailable(String),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PublishError::Encode(_))
    }
}

#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(&self, queue: &str, message: &OutboundMessage) -> Result<(), PublishError>;
}

/// Records published messages per queue. `fail_next(n)` makes the next `n`
/// publishes fail with `Unavailable`.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    published: Arc<Mutex<HashMap<String, Vec<OutboundMessage>>>>,
    failures_left: Arc<AtomicUsize>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn messages(&self, queue: &str) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .map(|p| p.get(queue).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.published
            .lock()
            .map(|p| p.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl QueuePublisher for MemoryPublisher {
    async fn publish(&self, queue: &str, message: &OutboundMessage) -> Result<(), PublishError> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(PublishError::Unavailable(format!(
                "simulated outage publishing to '{}'",
                queue
            )));
        }

        self.published
            .lock()
            .map_err(|_| PublishError::Unavailable("publisher lock poisoned".to_string()))?
            .entry(queue.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::InboundRequest;

    #[test]
    fn test_outbound_message_parses_as_inbound() {
        let message = OutboundMessage::new("process.requested", 12);
        let parsed = InboundRequest::parse(&message.to_json().unwrap()).unwrap();

        assert_eq!(parsed.event_id, message.event_id);
        assert_eq!(parsed.event_type, "process.requested");
        assert_eq!(parsed.job_id, 12);
        assert!(parsed.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_memory_publisher_failures() {
        let publisher = MemoryPublisher::new();
        publisher.fail_next(1);
        let message = OutboundMessage::new("x", 1);

        assert!(publisher.publish("q", &message).await.is_err());
        publisher.publish("q", &message).await.unwrap();
        assert_eq!(publisher.messages("q"), vec![message]);
        assert_eq!(publisher.total(), 1);
    }
}
