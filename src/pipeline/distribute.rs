//! Single-destination delivery.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use crate::config::DistributorConfig;
use crate::error::{Error, PluginError};
use crate::plugins::{ActionArgs, PluginManager};
use crate::sanitize::sanitize_json;

/// Outcome of one distributor call that did not raise.
#[derive(Debug)]
pub enum Delivery {
    Sent,
    /// The plugin failed; the failure was logged and not propagated.
    Swallowed(PluginError),
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

/// Sends content through one distributor plugin, isolating plugin failures
/// from the caller.
#[derive(Clone)]
pub struct DistributionFanout {
    plugins: Arc<PluginManager>,
}

impl DistributionFanout {
    pub fn new(plugins: Arc<PluginManager>) -> Self {
        Self { plugins }
    }

    /// Deliver `content` through `distributor`.
    ///
    /// Plugin failures (load, init or the `distribute` call itself) come back
    /// as [`Delivery::Swallowed`]. Only errors that did not originate in the
    /// plugin system are returned as `Err`.
    pub async fn distribute_content(
        &self,
        distributor: &DistributorConfig,
        content: &Value,
    ) -> Result<Delivery, Error> {
        let name = &distributor.plugin;

        let plugin = match self.plugins.get_distributor(name, &distributor.config).await {
            Ok(p) => p,
            Err(e) => return Ok(swallow(name, e)),
        };

        let args = ActionArgs {
            input: sanitize_json(content.clone()),
            config: distributor.config.clone(),
        };

        match plugin.distribute(args).await {
            Ok(()) => {
                debug!(plugin = %name, "Content distributed");
                Ok(Delivery::Sent)
            }
            Err(e) => match e.downcast::<Error>() {
                Ok(inner) if !inner.is_plugin_error() => Err(inner),
                Ok(inner) => Ok(swallow(name, execution_error(name, &inner.to_string()))),
                Err(e) => Ok(swallow(name, execution_error(name, &format!("{e:#}")))),
            },
        }
    }
}

fn execution_error(name: &str, reason: &str) -> PluginError {
    PluginError::Execution {
        name: name.to_string(),
        operation: "distribute".into(),
        reason: reason.to_string(),
    }
}

fn swallow(name: &str, e: PluginError) -> Delivery {
    error!(plugin = %name, error = %e, "Plugin error during distribution");
    Delivery::Swallowed(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::pipeline::testing::{distributor, recording_plugin_manager};
    use serde_json::json;

    #[tokio::test]
    async fn delivers_sanitized_content() {
        let (manager, deliveries) = recording_plugin_manager();
        let fanout = DistributionFanout::new(Arc::new(manager));
        let content = json!({ "body": json!({"x": 1}).to_string() });

        let outcome = fanout
            .distribute_content(&distributor("@test/record", vec![]), &content)
            .await
            .unwrap();

        assert!(outcome.is_sent());
        assert_eq!(deliveries.lock().unwrap().as_slice(), &[json!({ "body": { "x": 1 } })]);
    }

    #[tokio::test]
    async fn plugin_failures_are_swallowed() {
        let (manager, _) = recording_plugin_manager();
        let fanout = DistributionFanout::new(Arc::new(manager));

        let outcome = fanout
            .distribute_content(&distributor("@test/broken", vec![]), &json!("x"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Delivery::Swallowed(PluginError::Execution { .. })
        ));

        let outcome = fanout
            .distribute_content(&distributor("@test/missing", vec![]), &json!("x"))
            .await
            .unwrap();
        assert!(matches!(outcome, Delivery::Swallowed(PluginError::Load { .. })));
    }

    #[tokio::test]
    async fn non_plugin_errors_propagate() {
        let (manager, _) = recording_plugin_manager();
        let fanout = DistributionFanout::new(Arc::new(manager));
        let err = fanout
            .distribute_content(&distributor("@test/system", vec![]), &json!("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::Query(_))));
    }
}
