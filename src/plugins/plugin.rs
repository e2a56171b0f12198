//! Plugin capability traits.
//!
//! A plugin module produces instances of exactly one capability:
//! [`Transformer`], [`Distributor`] or [`Source`]. The capability is fixed by
//! the [`PluginInstance`] variant the module constructs, and is checked once
//! when the manager instantiates it rather than on every call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability a plugin provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Transformer,
    Distributor,
    Source,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginKind::Transformer => "transformer",
            PluginKind::Distributor => "distributor",
            PluginKind::Source => "source",
        };
        f.write_str(s)
    }
}

/// Arguments passed to every capability call.
#[derive(Debug, Clone)]
pub struct ActionArgs {
    pub input: Value,
    pub config: Value,
}

/// Lifecycle shared by every capability.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Called once with the instance config before the instance is cached.
    async fn initialize(&self, config: &Value) -> anyhow::Result<()>;

    /// Release external resources. Called on cleanup and reload.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// HTTP endpoints this plugin wants mounted under `/plugin/{name}`.
    fn endpoints(&self) -> Vec<PluginEndpoint> {
        Vec::new()
    }
}

/// Maps content to modified content.
///
/// Returning `Ok(None)` (or `Some(Value::Null)`) is treated as a failed step.
#[async_trait]
pub trait Transformer: Plugin {
    async fn transform(&self, args: ActionArgs) -> anyhow::Result<Option<Value>>;
}

/// Delivers finished content to an external destination.
#[async_trait]
pub trait Distributor: Plugin {
    async fn distribute(&self, args: ActionArgs) -> anyhow::Result<()>;
}

/// Produces content items from an external system.
#[async_trait]
pub trait Source: Plugin {
    async fn collect(&self, args: ActionArgs) -> anyhow::Result<Vec<Value>>;
}

/// A live plugin object, tagged by capability.
#[derive(Clone)]
pub enum PluginInstance {
    Transformer(Arc<dyn Transformer>),
    Distributor(Arc<dyn Distributor>),
    Source(Arc<dyn Source>),
}

impl PluginInstance {
    pub fn kind(&self) -> PluginKind {
        match self {
            PluginInstance::Transformer(_) => PluginKind::Transformer,
            PluginInstance::Distributor(_) => PluginKind::Distributor,
            PluginInstance::Source(_) => PluginKind::Source,
        }
    }

    pub async fn initialize(&self, config: &Value) -> anyhow::Result<()> {
        match self {
            PluginInstance::Transformer(p) => p.initialize(config).await,
            PluginInstance::Distributor(p) => p.initialize(config).await,
            PluginInstance::Source(p) => p.initialize(config).await,
        }
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        match self {
            PluginInstance::Transformer(p) => p.shutdown().await,
            PluginInstance::Distributor(p) => p.shutdown().await,
            PluginInstance::Source(p) => p.shutdown().await,
        }
    }

    pub fn endpoints(&self) -> Vec<PluginEndpoint> {
        match self {
            PluginInstance::Transformer(p) => p.endpoints(),
            PluginInstance::Distributor(p) => p.endpoints(),
            PluginInstance::Source(p) => p.endpoints(),
        }
    }

    pub fn as_transformer(&self) -> Option<Arc<dyn Transformer>> {
        match self {
            PluginInstance::Transformer(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_distributor(&self) -> Option<Arc<dyn Distributor>> {
        match self {
            PluginInstance::Distributor(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_source(&self) -> Option<Arc<dyn Source>> {
        match self {
            PluginInstance::Source(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    /// Whether two handles point at the same live object.
    pub fn same_instance(&self, other: &PluginInstance) -> bool {
        match (self, other) {
            (PluginInstance::Transformer(a), PluginInstance::Transformer(b)) => {
                Arc::ptr_eq(a, b)
            }
            (PluginInstance::Distributor(a), PluginInstance::Distributor(b)) => {
                Arc::ptr_eq(a, b)
            }
            (PluginInstance::Source(a), PluginInstance::Source(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PluginInstance").field(&self.kind()).finish()
    }
}

/// Loaded plugin code: constructs fresh, uninitialized instances.
pub trait PluginModule: Send + Sync {
    fn instantiate(&self) -> PluginInstance;
}

impl<F> PluginModule for F
where
    F: Fn() -> PluginInstance + Send + Sync,
{
    fn instantiate(&self) -> PluginInstance {
        self()
    }
}

// ── Endpoints ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for EndpointMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointMethod::Get => "GET",
            EndpointMethod::Post => "POST",
            EndpointMethod::Put => "PUT",
            EndpointMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Request handed to a plugin endpoint handler.
#[derive(Debug, Clone, Default)]
pub struct EndpointRequest {
    pub query: HashMap<String, String>,
    pub body: Value,
}

#[async_trait]
pub trait EndpointHandler: Send + Sync {
    async fn handle(&self, request: EndpointRequest) -> anyhow::Result<Value>;
}

/// An HTTP endpoint exposed by a plugin, relative to its mount point.
#[derive(Clone)]
pub struct PluginEndpoint {
    pub path: String,
    pub method: EndpointMethod,
    pub handler: Arc<dyn EndpointHandler>,
}

impl PluginEndpoint {
    /// Whether this endpoint serves `method` on `path` (leading slashes ignored).
    pub fn matches(&self, method: EndpointMethod, path: &str) -> bool {
        self.method == method
            && self.path.trim_start_matches('/') == path.trim_start_matches('/')
    }
}

impl fmt::Debug for PluginEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEndpoint")
            .field("path", &self.path)
            .field("method", &self.method)
            .finish()
    }
}
