//! In-process plugins for pipeline tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::{DistributorConfig, PluginManagerConfig, PluginRegistration, TransformConfig};
use crate::error::{DatabaseError, Error};
use crate::plugins::key::normalize_name;
use crate::plugins::{
    ActionArgs, Distributor, Plugin, PluginInstance, PluginKind, PluginManager, PluginModule,
    StaticResolver, Transformer,
};

/// Inputs received by `@test/record`, in delivery order.
pub type Deliveries = Arc<Mutex<Vec<Value>>>;

enum Behavior {
    /// Return `config.value`.
    Set,
    /// Return `None`.
    Null,
    /// Always fail.
    Fail,
    /// Fail when the input has `"poison": true`, otherwise return `config.value`.
    Picky,
    /// Wrap the input as `{"items": input}`.
    Wrap,
}

struct TestTransform(Behavior);

#[async_trait]
impl Plugin for TestTransform {
    async fn initialize(&self, _config: &Value) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Transformer for TestTransform {
    async fn transform(&self, args: ActionArgs) -> anyhow::Result<Option<Value>> {
        match self.0 {
            Behavior::Set => Ok(Some(args.config["value"].clone())),
            Behavior::Null => Ok(None),
            Behavior::Fail => anyhow::bail!("transform exploded"),
            Behavior::Picky => {
                if args.input["poison"] == json!(true) {
                    anyhow::bail!("poisoned input");
                }
                Ok(Some(args.config["value"].clone()))
            }
            Behavior::Wrap => Ok(Some(json!({ "items": args.input }))),
        }
    }
}

struct Recorder(Deliveries);

#[async_trait]
impl Plugin for Recorder {
    async fn initialize(&self, _config: &Value) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Distributor for Recorder {
    async fn distribute(&self, args: ActionArgs) -> anyhow::Result<()> {
        if let Ok(mut sink) = self.0.lock() {
            sink.push(args.input);
        }
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl Plugin for Broken {
    async fn initialize(&self, _config: &Value) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Distributor for Broken {
    async fn distribute(&self, _args: ActionArgs) -> anyhow::Result<()> {
        anyhow::bail!("destination down")
    }
}

/// Fails with an error that did not come from the plugin system.
struct SystemFault;

#[async_trait]
impl Plugin for SystemFault {
    async fn initialize(&self, _config: &Value) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Distributor for SystemFault {
    async fn distribute(&self, _args: ActionArgs) -> anyhow::Result<()> {
        Err(Error::from(DatabaseError::Query("disk full".into())).into())
    }
}

fn transformer(behavior: fn() -> Behavior) -> Arc<dyn PluginModule> {
    Arc::new(move || PluginInstance::Transformer(Arc::new(TestTransform(behavior()))))
}

/// Manager serving every `@test/*` plugin; `@test/record` writes to the
/// returned sink.
pub fn recording_plugin_manager() -> (PluginManager, Deliveries) {
    let deliveries: Deliveries = Arc::default();
    let sink = Arc::clone(&deliveries);

    let modules: Vec<(&str, PluginKind, Arc<dyn PluginModule>)> = vec![
        ("@test/set", PluginKind::Transformer, transformer(|| Behavior::Set)),
        ("@test/null", PluginKind::Transformer, transformer(|| Behavior::Null)),
        ("@test/fail", PluginKind::Transformer, transformer(|| Behavior::Fail)),
        ("@test/picky", PluginKind::Transformer, transformer(|| Behavior::Picky)),
        ("@test/wrap", PluginKind::Transformer, transformer(|| Behavior::Wrap)),
        (
            "@test/record",
            PluginKind::Distributor,
            Arc::new(move || PluginInstance::Distributor(Arc::new(Recorder(Arc::clone(&sink))))),
        ),
        (
            "@test/broken",
            PluginKind::Distributor,
            Arc::new(|| PluginInstance::Distributor(Arc::new(Broken))),
        ),
        (
            "@test/system",
            PluginKind::Distributor,
            Arc::new(|| PluginInstance::Distributor(Arc::new(SystemFault))),
        ),
    ];

    let resolver = StaticResolver::new();
    let mut registry = HashMap::new();
    for (name, kind, module) in modules {
        resolver.register(normalize_name(name), module);
        registry.insert(
            name.to_string(),
            PluginRegistration {
                kind,
                url: format!("test://{name}"),
                config: None,
            },
        );
    }

    let manager = PluginManager::new(registry, Arc::new(resolver), PluginManagerConfig::default());
    (manager, deliveries)
}

pub fn plugin_manager() -> PluginManager {
    recording_plugin_manager().0
}

pub fn transform(plugin: &str, config: Value) -> TransformConfig {
    TransformConfig {
        plugin: plugin.to_string(),
        config,
    }
}

pub fn distributor(plugin: &str, transform: Vec<TransformConfig>) -> DistributorConfig {
    DistributorConfig {
        plugin: plugin.to_string(),
        config: json!({}),
        transform,
    }
}
