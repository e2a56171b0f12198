//! Code resolution: turning a plugin remote into loadable module code.
//!
//! The manager's caching, retry and disablement logic only talks to the
//! [`CodeResolver`] trait, so the loading mechanism (statically linked
//! registry, subprocess, dynamic library) can change without touching it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::PluginError;
use crate::plugins::plugin::PluginModule;

/// Location of one plugin package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Normalized remote name (see [`crate::plugins::key::normalize_name`]).
    pub name: String,
    /// Entry point from the plugin registry.
    pub entry: String,
}

#[async_trait]
pub trait CodeResolver: Send + Sync {
    /// Fetch the module for `remote`.
    async fn resolve(&self, remote: &RemoteConfig) -> Result<Arc<dyn PluginModule>, PluginError>;

    /// Drop any code cached by the resolver so the next `resolve` re-fetches.
    async fn discard_cache(&self) {}
}

/// Resolver backed by modules compiled into the binary.
///
/// Modules are registered under a remote name, an entry url, or both;
/// `resolve` tries the remote name first.
#[derive(Default)]
pub struct StaticResolver {
    modules: RwLock<HashMap<String, Arc<dyn PluginModule>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under `key` (remote name or entry url).
    pub fn register(&self, key: impl Into<String>, module: Arc<dyn PluginModule>) {
        let key = key.into();
        if let Ok(mut modules) = self.modules.write() {
            debug!(key = %key, "Registered static plugin module");
            modules.insert(key, module);
        }
    }

    pub fn with_module(self, key: impl Into<String>, module: Arc<dyn PluginModule>) -> Self {
        self.register(key, module);
        self
    }

    pub fn len(&self) -> usize {
        self.modules.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CodeResolver for StaticResolver {
    async fn resolve(&self, remote: &RemoteConfig) -> Result<Arc<dyn PluginModule>, PluginError> {
        let modules = self.modules.read().map_err(|_| PluginError::Load {
            name: remote.name.clone(),
            url: remote.entry.clone(),
            reason: "module table poisoned".into(),
        })?;
        modules
            .get(&remote.name)
            .or_else(|| modules.get(&remote.entry))
            .cloned()
            .ok_or_else(|| PluginError::Load {
                name: remote.name.clone(),
                url: remote.entry.clone(),
                reason: "Plugin module not found".into(),
            })
    }
}
