//! Content pipeline.
//!
//! Approved content flows through:
//! 1. `TransformPipeline::apply_transforms()` with the feed's global transforms
//! 2. per distributor: its own transforms, then `DistributionFanout::distribute_content()`
//!
//! `ContentProcessor` composes the two and owns the fallback rules.

pub mod distribute;
pub mod processor;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use distribute::{Delivery, DistributionFanout};
pub use processor::{ContentProcessor, ProcessConfig};
pub use transform::{TransformPipeline, TransformStage};
