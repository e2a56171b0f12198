//! Content processor: transforms content and fans it out to every
//! configured distributor.
//!
//! Failure isolation applies at every level:
//! 1. Global transforms: on failure, the original content is used
//! 2. Distributor transforms: on failure, the globally transformed content is used
//! 3. Distribution: one failing destination never blocks the others; only
//!    when every distributor fails is a [`ProcessorError`] raised

use futures::future::join_all;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{DistributorConfig, RecapConfig, StreamConfig, TransformConfig};
use crate::error::{Error, ProcessorError};
use crate::pipeline::distribute::{Delivery, DistributionFanout};
use crate::pipeline::transform::{TransformPipeline, TransformStage};

/// What to do with one feed's content.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    pub feed_id: String,
    pub transform: Vec<TransformConfig>,
    /// Only used by [`ContentProcessor::process_batch`].
    pub batch_transform: Vec<TransformConfig>,
    pub distribute: Vec<DistributorConfig>,
}

impl ProcessConfig {
    pub fn from_stream(feed_id: &str, stream: &StreamConfig) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            transform: stream.transform.clone(),
            batch_transform: Vec::new(),
            distribute: stream.distribute.clone(),
        }
    }

    pub fn from_recap(feed_id: &str, recap: &RecapConfig) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            transform: recap.transform.clone(),
            batch_transform: recap.batch_transform.clone(),
            distribute: recap.distribute.clone(),
        }
    }
}

pub struct ContentProcessor {
    transforms: TransformPipeline,
    fanout: DistributionFanout,
}

impl ContentProcessor {
    pub fn new(transforms: TransformPipeline, fanout: DistributionFanout) -> Self {
        Self { transforms, fanout }
    }

    /// Process one content item through transforms and distribution.
    pub async fn process(&self, content: &Value, config: &ProcessConfig) -> Result<(), ProcessorError> {
        let transformed = self
            .transforms
            .apply_or(
                content.clone(),
                &config.transform,
                TransformStage::Global,
                content.clone(),
            )
            .await;

        self.distribute_all(&transformed, config).await
    }

    /// Process a batch: per-item transforms in parallel, one batch transform
    /// over the collected results, then distribution of the batch result.
    pub async fn process_batch(
        &self,
        items: &[Value],
        config: &ProcessConfig,
    ) -> Result<(), ProcessorError> {
        info!(feed = %config.feed_id, count = items.len(), "Processing content batch");

        let transformed = join_all(items.iter().map(|item| {
            self.transforms.apply_or(
                item.clone(),
                &config.transform,
                TransformStage::Global,
                item.clone(),
            )
        }))
        .await;

        let collected = Value::Array(transformed);
        let batch = self
            .transforms
            .apply_or(
                collected.clone(),
                &config.batch_transform,
                TransformStage::Batch,
                collected,
            )
            .await;

        self.distribute_all(&batch, config).await
    }

    async fn distribute_all(&self, content: &Value, config: &ProcessConfig) -> Result<(), ProcessorError> {
        if config.distribute.is_empty() {
            return Err(ProcessorError::new(&config.feed_id, "No distributors configured"));
        }

        let mut sent = 0usize;
        let mut causes: Vec<Error> = Vec::new();

        for distributor in &config.distribute {
            let payload = self
                .transforms
                .apply_or(
                    content.clone(),
                    &distributor.transform,
                    TransformStage::Distributor,
                    content.clone(),
                )
                .await;

            match self.fanout.distribute_content(distributor, &payload).await {
                Ok(Delivery::Sent) => sent += 1,
                Ok(Delivery::Swallowed(e)) => causes.push(Error::Plugin(e)),
                Err(e) => {
                    error!(
                        feed = %config.feed_id,
                        plugin = %distributor.plugin,
                        error = %e,
                        "Distributor failed"
                    );
                    causes.push(e);
                }
            }
        }

        if sent == 0 {
            return Err(ProcessorError::new(&config.feed_id, "All distributors failed").with_causes(causes));
        }
        if !causes.is_empty() {
            warn!(
                feed = %config.feed_id,
                failed = causes.len(),
                delivered = sent,
                "Some distributors failed"
            );
        }
        Ok(())
    }
}
