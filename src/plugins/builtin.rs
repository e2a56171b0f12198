//! Plugins compiled into the binary.
//!
//! - `@curatedotfun/simple-transform`: renders a `{{field}}` template into text
//! - `@curatedotfun/object-transform`: builds an object from per-key templates
//! - `@curatedotfun/webhook`: POSTs content as JSON to a configured url

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::key::normalize_name;
use super::plugin::{
    ActionArgs, Distributor, EndpointHandler, EndpointMethod, EndpointRequest, Plugin,
    PluginEndpoint, PluginInstance, PluginModule, Transformer,
};
use super::resolver::StaticResolver;

pub const SIMPLE_TRANSFORM: &str = "@curatedotfun/simple-transform";
pub const OBJECT_TRANSFORM: &str = "@curatedotfun/object-transform";
pub const WEBHOOK: &str = "@curatedotfun/webhook";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap());

/// Resolver preloaded with every builtin, under both remote name and
/// `builtin://` url.
pub fn builtin_resolver() -> StaticResolver {
    let resolver = StaticResolver::new();
    let modules: [(&str, Arc<dyn PluginModule>); 3] = [
        (
            SIMPLE_TRANSFORM,
            Arc::new(|| PluginInstance::Transformer(Arc::new(SimpleTransform::default()))),
        ),
        (
            OBJECT_TRANSFORM,
            Arc::new(|| PluginInstance::Transformer(Arc::new(ObjectTransform::default()))),
        ),
        (
            WEBHOOK,
            Arc::new(|| PluginInstance::Distributor(Arc::new(WebhookDistributor::default()))),
        ),
    ];
    for (package, module) in modules {
        let short = package.rsplit('/').next().unwrap_or(package);
        resolver.register(format!("builtin://{short}"), Arc::clone(&module));
        resolver.register(normalize_name(package), module);
    }
    resolver
}

/// Look up a dotted path (`author.handle`) in `input`.
fn lookup<'a>(input: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(input, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitute every `{{path}}` in `template`; missing fields render empty.
pub fn render_template(template: &str, input: &Value) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            lookup(input, &caps[1]).map(to_text).unwrap_or_default()
        })
        .into_owned()
}

fn required_str(config: &Value, field: &str) -> anyhow::Result<String> {
    config
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("config field `{field}` is required"))
}

// ── simple-transform ────────────────────────────────────────────────

#[derive(Default)]
pub struct SimpleTransform {
    format: OnceLock<String>,
}

#[async_trait]
impl Plugin for SimpleTransform {
    async fn initialize(&self, config: &Value) -> anyhow::Result<()> {
        let format = required_str(config, "format")?;
        let _ = self.format.set(format);
        Ok(())
    }
}

#[async_trait]
impl Transformer for SimpleTransform {
    async fn transform(&self, args: ActionArgs) -> anyhow::Result<Option<Value>> {
        let format = self
            .format
            .get()
            .ok_or_else(|| anyhow!("simple-transform is not initialized"))?;
        Ok(Some(Value::String(render_template(format, &args.input))))
    }
}

// ── object-transform ────────────────────────────────────────────────

#[derive(Default)]
pub struct ObjectTransform {
    mappings: OnceLock<Map<String, Value>>,
}

#[async_trait]
impl Plugin for ObjectTransform {
    async fn initialize(&self, config: &Value) -> anyhow::Result<()> {
        let mappings = config
            .get("mappings")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| anyhow!("config field `mappings` must be an object"))?;
        let _ = self.mappings.set(mappings);
        Ok(())
    }
}

#[async_trait]
impl Transformer for ObjectTransform {
    async fn transform(&self, args: ActionArgs) -> anyhow::Result<Option<Value>> {
        let mappings = self
            .mappings
            .get()
            .ok_or_else(|| anyhow!("object-transform is not initialized"))?;

        let mut output = Map::new();
        for (key, template) in mappings {
            let value = match template {
                Value::String(t) => map_field(t, &args.input),
                // Non-string mappings are literal values.
                other => other.clone(),
            };
            output.insert(key.clone(), value);
        }
        Ok(Some(Value::Object(output)))
    }
}

/// A template that is exactly one placeholder keeps the field's JSON type.
fn map_field(template: &str, input: &Value) -> Value {
    if let Some(caps) = PLACEHOLDER.captures(template)
        && caps.get(0).is_some_and(|m| m.as_str() == template.trim())
    {
        return lookup(input, &caps[1]).cloned().unwrap_or(Value::Null);
    }
    Value::String(render_template(template, input))
}

// ── webhook ─────────────────────────────────────────────────────────

#[derive(Default)]
struct WebhookState {
    url: OnceLock<String>,
    delivered: AtomicU64,
}

#[derive(Default)]
pub struct WebhookDistributor {
    client: reqwest::Client,
    state: Arc<WebhookState>,
}

struct WebhookStatus {
    state: Arc<WebhookState>,
}

#[async_trait]
impl EndpointHandler for WebhookStatus {
    async fn handle(&self, _request: EndpointRequest) -> anyhow::Result<Value> {
        Ok(json!({
            "url": self.state.url.get(),
            "delivered": self.state.delivered.load(Ordering::Relaxed),
        }))
    }
}

#[async_trait]
impl Plugin for WebhookDistributor {
    async fn initialize(&self, config: &Value) -> anyhow::Result<()> {
        let url = required_str(config, "url")?;
        reqwest::Url::parse(&url).with_context(|| format!("invalid webhook url {url}"))?;
        info!(url = %url, "Webhook distributor initialized");
        let _ = self.state.url.set(url);
        Ok(())
    }

    fn endpoints(&self) -> Vec<PluginEndpoint> {
        vec![PluginEndpoint {
            path: "/status".into(),
            method: EndpointMethod::Get,
            handler: Arc::new(WebhookStatus {
                state: Arc::clone(&self.state),
            }),
        }]
    }
}

#[async_trait]
impl Distributor for WebhookDistributor {
    async fn distribute(&self, args: ActionArgs) -> anyhow::Result<()> {
        let url = self
            .state
            .url
            .get()
            .ok_or_else(|| anyhow!("webhook is not initialized"))?;
        self.client
            .post(url)
            .json(&args.input)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()?;
        let delivered = self.state.delivered.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(url = %url, delivered, "Webhook delivered");
        Ok(())
    }
}
