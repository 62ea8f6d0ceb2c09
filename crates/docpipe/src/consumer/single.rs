use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use super::{Delivery, Handler, ItemOutcome};
use crate::config::PipelineConfig;
use crate::guard::FreshnessGuard;
use crate::pipeline::Executor;

/// Acknowledgement for a broker that delivers one message at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Acknowledge,
    NegativeAcknowledge { requeue: bool },
}

/// Requeues a retryable failure once. A message that fails again after
/// redelivery is dropped (or dead-lettered by the broker's own policy).
pub struct SingleConsumer {
    handler: Handler,
}

impl SingleConsumer {
    pub fn new(executor: Arc<dyn Executor>, guard: FreshnessGuard) -> Self {
        Self {
            handler: Handler::new(executor, guard),
        }
    }

    pub fn from_config(executor: Arc<dyn Executor>, config: &PipelineConfig) -> Self {
        let guard = FreshnessGuard::new(config.max_message_age_secs, config.max_clock_skew_secs);
        Self::new(executor, guard)
    }

    pub async fn process_one(&self, cancel: &CancellationToken, delivery: &Delivery) -> Ack {
        let span = info_span!("delivery", id = %delivery.id, redelivered = delivery.redelivered);
        let outcome = self.handler.handle(cancel, &delivery.body).instrument(span).await;
        ack_for(&outcome, delivery.redelivered)
    }
}

fn ack_for(outcome: &ItemOutcome, redelivered: bool) -> Ack {
    match outcome {
        ItemOutcome::Success => Ack::Acknowledge,
        failure if failure.is_retryable() => Ack::NegativeAcknowledge {
            requeue: !redelivered,
        },
        _ => Ack::NegativeAcknowledge { requeue: false },
    }
}
