//! Ordered transform stages.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::TransformConfig;
use crate::error::TransformError;
use crate::plugins::{ActionArgs, PluginManager};
use crate::sanitize::sanitize_json;

/// Where in the processing flow a transform list runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStage {
    Global,
    Distributor,
    Batch,
}

impl fmt::Display for TransformStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransformStage::Global => "global",
            TransformStage::Distributor => "distributor",
            TransformStage::Batch => "batch",
        };
        f.write_str(s)
    }
}

/// Applies a list of transformer plugins, threading each result into the next.
#[derive(Clone)]
pub struct TransformPipeline {
    plugins: Arc<PluginManager>,
}

impl TransformPipeline {
    pub fn new(plugins: Arc<PluginManager>) -> Self {
        Self { plugins }
    }

    /// Run `transforms` over `content` in order.
    ///
    /// Object results are deep-merged into an object accumulator (the new
    /// step's keys win); any other result replaces it. Every step output is
    /// sanitized. The first failing step aborts the stage.
    pub async fn apply_transforms(
        &self,
        content: Value,
        transforms: &[TransformConfig],
        stage: TransformStage,
    ) -> Result<Value, TransformError> {
        let mut result = content;

        for (index, step) in transforms.iter().enumerate() {
            let fail = |message: String| TransformError {
                plugin: step.plugin.clone(),
                stage,
                index,
                message,
            };

            let transformer = self
                .plugins
                .get_transformer(&step.plugin, &step.config)
                .await
                .map_err(|e| fail(e.to_string()))?;

            let output = transformer
                .transform(ActionArgs {
                    input: result.clone(),
                    config: step.config.clone(),
                })
                .await
                .map_err(|e| fail(format!("{e:#}")))?;

            let output = match output {
                Some(Value::Null) | None => {
                    return Err(fail("Transformer returned undefined or null".into()));
                }
                Some(v) => sanitize_json(v),
            };

            debug!(
                plugin = %step.plugin,
                stage = %stage,
                step = index + 1,
                "Transform step applied"
            );
            result = combine(result, output);
        }

        Ok(result)
    }

    /// Like [`apply_transforms`](Self::apply_transforms), but on failure logs
    /// and returns `fallback` instead.
    pub async fn apply_or(
        &self,
        content: Value,
        transforms: &[TransformConfig],
        stage: TransformStage,
        fallback: Value,
    ) -> Value {
        if transforms.is_empty() {
            return content;
        }
        match self.apply_transforms(content, transforms, stage).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, stage = %stage, "Transform failed, using fallback content");
                fallback
            }
        }
    }
}

fn combine(previous: Value, next: Value) -> Value {
    match (previous, next) {
        (Value::Object(base), Value::Object(overlay)) => Value::Object(deep_merge(base, overlay)),
        (_, next) => next,
    }
}

/// Recursively merge `overlay` into `base`. Nested objects merge; every other
/// value in `overlay` overwrites.
pub(crate) fn deep_merge(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(Value::Object(a)), Value::Object(b)) => Value::Object(deep_merge(a, b)),
            (_, v) => v,
        };
        base.insert(key, merged);
    }
    base
}
