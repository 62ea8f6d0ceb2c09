use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use super::{Delivery, Handler, ItemOutcome, OutcomeCode};
use crate::config::{BatchConfig, BatchMode, PipelineConfig};
use crate::guard::FreshnessGuard;
use crate::pipeline::Executor;

#[derive(Error, Debug)]
pub enum BatchError {
    /// All-or-nothing mode stopped at this item. Items before it were
    /// processed and are not rolled back.
    #[error("Item '{item_id}' failed with {code}: {message}")]
    ItemFailed {
        item_id: String,
        code: OutcomeCode,
        message: String,
        processed: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub failure_count: usize,
    pub total_count: usize,
    /// Delivery ids to report back for redelivery, in input order.
    pub failed_item_ids: Vec<String>,
}

impl BatchOutcome {
    pub fn to_response(&self) -> BatchResponse {
        BatchResponse {
            batch_item_failures: self
                .failed_item_ids
                .iter()
                .map(|id| BatchItemFailure {
                    item_identifier: id.clone(),
                })
                .collect(),
        }
    }
}

/// Partial batch response understood by serverless queue triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

pub struct BatchConsumer {
    handler: Handler,
    mode: BatchMode,
    concurrency: usize,
}

impl BatchConsumer {
    pub fn new(executor: Arc<dyn Executor>, guard: FreshnessGuard, batch: &BatchConfig) -> Self {
        Self {
            handler: Handler::new(executor, guard),
            mode: batch.mode,
            concurrency: batch.concurrency.max(1),
        }
    }

    pub fn from_config(executor: Arc<dyn Executor>, config: &PipelineConfig) -> Self {
        let guard = FreshnessGuard::new(config.max_message_age_secs, config.max_clock_skew_secs);
        Self::new(executor, guard, &config.batch)
    }

    pub async fn process_batch(
        &self,
        cancel: &CancellationToken,
        deliveries: &[Delivery],
    ) -> Result<BatchOutcome, BatchError> {
        let span = info_span!("batch", size = deliveries.len(), mode = ?self.mode);
        let outcome = match self.mode {
            BatchMode::PartialFailure => Ok(self.partial(cancel, deliveries).instrument(span.clone()).await),
            BatchMode::AllOrNothing => self.all_or_nothing(cancel, deliveries).instrument(span.clone()).await,
        };

        if let Ok(outcome) = &outcome {
            let _entered = span.enter();
            info!(
                success = outcome.success_count,
                failed = outcome.failure_count,
                total = outcome.total_count,
                "batch finished"
            );
        }
        outcome
    }

    /// Items run concurrently and independently; failures are collected.
    async fn partial(&self, cancel: &CancellationToken, deliveries: &[Delivery]) -> BatchOutcome {
        let results: Vec<(&str, ItemOutcome)> = stream::iter(deliveries)
            .map(|delivery| async move {
                let span = info_span!("item", item_id = %delivery.id);
                let outcome = self.handler.handle(cancel, &delivery.body).instrument(span).await;
                (delivery.id.as_str(), outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let failed_item_ids: Vec<String> = results
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(id, _)| id.to_string())
            .collect();

        BatchOutcome {
            success_count: results.len() - failed_item_ids.len(),
            failure_count: failed_item_ids.len(),
            total_count: results.len(),
            failed_item_ids,
        }
    }

    /// Items run in order; the first failure ends the batch.
    async fn all_or_nothing(
        &self,
        cancel: &CancellationToken,
        deliveries: &[Delivery],
    ) -> Result<BatchOutcome, BatchError> {
        for (processed, delivery) in deliveries.iter().enumerate() {
            let span = info_span!("item", item_id = %delivery.id);
            match self.handler.handle(cancel, &delivery.body).instrument(span).await {
                ItemOutcome::Success => {}
                ItemOutcome::Failure { code, message } => {
                    return Err(BatchError::ItemFailed {
                        item_id: delivery.id.clone(),
                        code,
                        message,
                        processed,
                    })
                }
            }
        }

        Ok(BatchOutcome {
            success_count: deliveries.len(),
            failure_count: 0,
            total_count: deliveries.len(),
            failed_item_ids: Vec::new(),
        })
    }
}
