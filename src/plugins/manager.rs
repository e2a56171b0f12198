//! Plugin lifecycle manager.
//!
//! Loads plugin modules through a [`CodeResolver`], instantiates and
//! initializes them per config, and caches the live instances:
//!
//! - instances are keyed by `(normalized name, canonical config)` and stay
//!   valid for `instance_ttl` (days)
//! - module code is keyed by remote and re-fetched after `module_ttl`
//!   (minutes), so code updates propagate while configured instances survive
//! - initialization is retried with fixed delays; every failure bumps the
//!   key's failure counter and at `max_auth_failures` the key is disabled
//!   until [`PluginManager::reload_all_plugins`]
//!
//! Concurrent `get_plugin` calls for the same uncached key are not
//! coalesced: both may load and initialize, and the last one wins the cache
//! slot. State is only locked for short bookkeeping sections, never across
//! plugin calls.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{PluginManagerConfig, PluginRegistration};
use crate::error::PluginError;
use crate::pipeline::transform::deep_merge;
use crate::plugins::key::{instance_key, normalize_name};
use crate::plugins::plugin::{
    Distributor, EndpointMethod, PluginEndpoint, PluginInstance, PluginKind, PluginModule, Source,
    Transformer,
};
use crate::plugins::resolver::{CodeResolver, RemoteConfig};

/// Load state of a remote module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Active,
    Loading,
    Failed,
}

struct RemoteState {
    config: RemoteConfig,
    module: Option<Arc<dyn PluginModule>>,
    loaded_at: Option<Instant>,
    status: RemoteStatus,
    last_error: Option<PluginError>,
}

struct InstanceState {
    instance: PluginInstance,
    plugin_name: String,
    loaded_at: Instant,
}

#[derive(Default)]
struct ManagerState {
    remotes: HashMap<String, RemoteState>,
    instances: HashMap<String, InstanceState>,
    /// Consecutive initialization failures per instance key.
    failures: HashMap<String, u32>,
    /// Endpoints per remote name.
    endpoints: HashMap<String, Vec<PluginEndpoint>>,
}

impl ManagerState {
    fn register_endpoints(&mut self, remote: &str, endpoints: Vec<PluginEndpoint>) {
        self.unregister_endpoints(remote);
        for endpoint in &endpoints {
            info!(
                method = %endpoint.method,
                path = %format!("/plugin/{remote}{}", endpoint.path),
                "Registering plugin endpoint"
            );
        }
        self.endpoints.insert(remote.to_string(), endpoints);
    }

    fn unregister_endpoints(&mut self, remote: &str) {
        if let Some(endpoints) = self.endpoints.remove(remote) {
            for endpoint in &endpoints {
                debug!(
                    method = %endpoint.method,
                    path = %format!("/plugin/{remote}{}", endpoint.path),
                    "Unregistering plugin endpoint"
                );
            }
        }
    }
}

/// Why one initialization attempt failed.
enum AttemptError {
    /// Counts toward disablement and may be retried.
    Retryable(PluginError),
    /// The module cannot ever satisfy the request.
    Fatal(PluginError),
}

/// Manages the complete lifecycle of plugins: loading, initialization,
/// caching, endpoint registration and cleanup.
pub struct PluginManager {
    registry: HashMap<String, PluginRegistration>,
    resolver: Arc<dyn CodeResolver>,
    settings: PluginManagerConfig,
    state: Mutex<ManagerState>,
}

impl PluginManager {
    pub fn new(
        registry: HashMap<String, PluginRegistration>,
        resolver: Arc<dyn CodeResolver>,
        settings: PluginManagerConfig,
    ) -> Self {
        Self {
            registry,
            resolver,
            settings,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Get or create a `kind` plugin instance for `name` configured with `config`.
    pub async fn get_plugin(
        &self,
        name: &str,
        kind: PluginKind,
        config: &Value,
    ) -> Result<PluginInstance, PluginError> {
        let registration = self.registry.get(name).ok_or_else(|| PluginError::Load {
            name: name.to_string(),
            url: String::new(),
            reason: format!("Plugin {name} not found in app configuration"),
        })?;

        let config = &with_registered_defaults(registration.config.as_ref(), config);
        let remote_name = normalize_name(name);
        let key = instance_key(&remote_name, config)?;

        {
            let mut state = self.state.lock().await;

            let failures = state.failures.get(&key).copied().unwrap_or(0);
            if failures >= self.settings.max_auth_failures {
                return Err(PluginError::Disabled {
                    name: name.to_string(),
                    failures,
                });
            }

            if let Some(cached) = state.instances.get(&key) {
                if cached.loaded_at.elapsed() <= self.settings.instance_ttl {
                    return check_kind(name, &registration.url, cached.instance.clone(), kind)
                        .map_err(|e| match e {
                            AttemptError::Retryable(e) | AttemptError::Fatal(e) => e,
                        });
                }
                debug!(plugin = %name, key = %key, "Cached plugin instance is stale");
            }

            state
                .remotes
                .entry(remote_name.clone())
                .or_insert_with(|| RemoteState {
                    config: RemoteConfig {
                        name: remote_name.clone(),
                        entry: registration.url.clone(),
                    },
                    module: None,
                    loaded_at: None,
                    status: RemoteStatus::Active,
                    last_error: None,
                });
        }

        let attempts = self.settings.retry_delays.len() + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            match self
                .try_create(name, &remote_name, &registration.url, kind, config)
                .await
            {
                Ok(instance) => {
                    let mut state = self.state.lock().await;
                    let endpoints = instance.endpoints();
                    if !endpoints.is_empty() {
                        state.register_endpoints(&remote_name, endpoints);
                    }
                    state.failures.remove(&key);
                    state.instances.insert(
                        key.clone(),
                        InstanceState {
                            instance: instance.clone(),
                            plugin_name: name.to_string(),
                            loaded_at: Instant::now(),
                        },
                    );
                    info!(plugin = %name, kind = %kind, key = %key, "Plugin instance ready");
                    return Ok(instance);
                }
                Err(AttemptError::Fatal(e)) => {
                    error!(plugin = %name, error = %e, "Plugin error");
                    return Err(e);
                }
                Err(AttemptError::Retryable(e)) => {
                    let failures = {
                        let mut state = self.state.lock().await;
                        let count = state.failures.entry(key.clone()).or_insert(0);
                        *count += 1;
                        let failures = *count;
                        if failures >= self.settings.max_auth_failures {
                            state.instances.remove(&key);
                            state.unregister_endpoints(&remote_name);
                        }
                        failures
                    };

                    if failures >= self.settings.max_auth_failures {
                        error!(
                            plugin = %name,
                            failures,
                            error = %e,
                            "Plugin disabled due to repeated initialization failures"
                        );
                        return Err(PluginError::Disabled {
                            name: name.to_string(),
                            failures,
                        });
                    }

                    if let Some(delay) = self.settings.retry_delays.get(attempt) {
                        warn!(
                            plugin = %name,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Plugin initialization failed, retrying"
                        );
                        tokio::time::sleep(*delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        self.state.lock().await.unregister_endpoints(&remote_name);
        let err = last_error.unwrap_or_else(|| PluginError::Unexpected {
            name: name.to_string(),
            reason: format!("Failed to initialize plugin {name}"),
        });
        error!(plugin = %name, error = %err, "Plugin error");
        Err(err)
    }

    /// Typed lookup for a transformer.
    pub async fn get_transformer(
        &self,
        name: &str,
        config: &Value,
    ) -> Result<Arc<dyn Transformer>, PluginError> {
        let instance = self.get_plugin(name, PluginKind::Transformer, config).await?;
        instance.as_transformer().ok_or_else(|| mismatch(name, PluginKind::Transformer))
    }

    /// Typed lookup for a distributor.
    pub async fn get_distributor(
        &self,
        name: &str,
        config: &Value,
    ) -> Result<Arc<dyn Distributor>, PluginError> {
        let instance = self.get_plugin(name, PluginKind::Distributor, config).await?;
        instance.as_distributor().ok_or_else(|| mismatch(name, PluginKind::Distributor))
    }

    /// Typed lookup for a source.
    pub async fn get_source(&self, name: &str, config: &Value) -> Result<Arc<dyn Source>, PluginError> {
        let instance = self.get_plugin(name, PluginKind::Source, config).await?;
        instance.as_source().ok_or_else(|| mismatch(name, PluginKind::Source))
    }

    /// One load + instantiate + initialize attempt.
    async fn try_create(
        &self,
        name: &str,
        remote_name: &str,
        url: &str,
        kind: PluginKind,
        config: &Value,
    ) -> Result<PluginInstance, AttemptError> {
        let module = self
            .ensure_module(remote_name)
            .await
            .map_err(AttemptError::Retryable)?;

        let instance = check_kind(name, url, module.instantiate(), kind)?;

        instance.initialize(config).await.map_err(|e| {
            AttemptError::Retryable(PluginError::Init {
                name: name.to_string(),
                reason: format!("{e:#}"),
            })
        })?;

        Ok(instance)
    }

    /// Return the remote's module, re-fetching it when missing or stale.
    async fn ensure_module(&self, remote_name: &str) -> Result<Arc<dyn PluginModule>, PluginError> {
        let remote_config = {
            let mut state = self.state.lock().await;
            let remote = state
                .remotes
                .get_mut(remote_name)
                .ok_or_else(|| PluginError::Unexpected {
                    name: remote_name.to_string(),
                    reason: "remote not registered".into(),
                })?;

            let fresh = remote
                .loaded_at
                .is_some_and(|at| at.elapsed() <= self.settings.module_ttl);
            if let (Some(module), true, RemoteStatus::Active) = (&remote.module, fresh, remote.status) {
                return Ok(Arc::clone(module));
            }

            remote.status = RemoteStatus::Loading;
            remote.config.clone()
        };

        let loaded = self.resolver.resolve(&remote_config).await;

        let mut state = self.state.lock().await;
        match loaded {
            Ok(module) => {
                if let Some(remote) = state.remotes.get_mut(remote_name) {
                    remote.module = Some(Arc::clone(&module));
                    remote.loaded_at = Some(Instant::now());
                    remote.status = RemoteStatus::Active;
                    remote.last_error = None;
                }
                info!(
                    remote = %remote_name,
                    active_remotes = state.remotes.len(),
                    "Loaded module for remote"
                );
                Ok(module)
            }
            Err(e) => {
                if let Some(remote) = state.remotes.get_mut(remote_name) {
                    remote.status = RemoteStatus::Failed;
                    remote.last_error = Some(e.clone());
                }
                state.unregister_endpoints(remote_name);
                warn!(remote = %remote_name, error = %e, "Failed to load module");
                Err(e)
            }
        }
    }

    /// Shut down every cached instance and clear all caches.
    ///
    /// Every instance gets its `shutdown` call even if earlier ones fail;
    /// failures are returned together.
    pub async fn cleanup(&self) -> Result<(), PluginError> {
        let instances = {
            let mut state = self.state.lock().await;
            let instances = std::mem::take(&mut state.instances);
            let remotes: Vec<String> = state.endpoints.keys().cloned().collect();
            for remote in remotes {
                state.unregister_endpoints(&remote);
            }
            state.remotes.clear();
            state.failures.clear();
            instances
        };

        let mut failures = Vec::new();
        for (key, cached) in instances {
            if let Err(e) = cached.instance.shutdown().await {
                error!(
                    plugin = %cached.plugin_name,
                    key = %key,
                    error = %e,
                    "Shutdown error"
                );
                failures.push(format!(
                    "Failed to shutdown plugin instance {key} ({}): {e:#}",
                    cached.plugin_name
                ));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Shutdown { failures })
        }
    }

    /// Clean up, then make the resolver forget cached code so the next
    /// `get_plugin` re-fetches and re-initializes.
    pub async fn reload_all_plugins(&self) -> Result<(), PluginError> {
        let result = self.cleanup().await;
        self.resolver.discard_cache().await;
        info!("All plugins reloaded");
        result
    }

    /// Find the endpoint mounted at `/plugin/{remote}/{path}` for `method`.
    pub async fn find_endpoint(
        &self,
        remote: &str,
        method: EndpointMethod,
        path: &str,
    ) -> Option<PluginEndpoint> {
        let state = self.state.lock().await;
        state
            .endpoints
            .get(remote)?
            .iter()
            .find(|e| e.matches(method, path))
            .cloned()
    }

    /// Registered endpoints per remote name.
    pub async fn endpoints(&self) -> HashMap<String, Vec<PluginEndpoint>> {
        self.state.lock().await.endpoints.clone()
    }

    /// Number of cached live instances.
    pub async fn instance_count(&self) -> usize {
        self.state.lock().await.instances.len()
    }

    /// Load status of a remote, if it has been seen.
    pub async fn remote_status(&self, remote: &str) -> Option<RemoteStatus> {
        self.state.lock().await.remotes.get(remote).map(|r| r.status)
    }

    /// Last load error recorded for a remote.
    pub async fn remote_error(&self, remote: &str) -> Option<PluginError> {
        self.state
            .lock()
            .await
            .remotes
            .get(remote)
            .and_then(|r| r.last_error.clone())
    }
}

fn check_kind(
    name: &str,
    url: &str,
    instance: PluginInstance,
    kind: PluginKind,
) -> Result<PluginInstance, AttemptError> {
    if instance.kind() == kind {
        Ok(instance)
    } else {
        Err(AttemptError::Fatal(PluginError::Load {
            name: name.to_string(),
            url: url.to_string(),
            reason: format!(
                "module provides a {} but a {kind} was requested",
                instance.kind()
            ),
        }))
    }
}

fn mismatch(name: &str, kind: PluginKind) -> PluginError {
    PluginError::Unexpected {
        name: name.to_string(),
        reason: format!("instance is not a {kind}"),
    }
}

/// Registry defaults with the caller's config on top. Objects merge
/// recursively; a non-object caller config replaces the defaults unless it
/// is null.
fn with_registered_defaults(defaults: Option<&Value>, config: &Value) -> Value {
    match (defaults, config) {
        (Some(Value::Object(base)), Value::Object(overlay)) => {
            Value::Object(deep_merge(base.clone(), overlay.clone()))
        }
        (Some(base), Value::Null) => base.clone(),
        _ => config.clone(),
    }
}
