//! Configuration types.
//!
//! The application config is a JSON document (`curate.config.json`) with
//! three sections: `global` settings, the `plugins` registry and `feeds`.
//! Any string value of the exact form `"{ENV_VAR}"` is replaced with the
//! value of that environment variable at load time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::curation::model::SubmissionStatus;
use crate::error::ConfigError;
use crate::plugins::PluginKind;

/// Default poll interval for mention checks.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default daily submission quota per curator.
const DEFAULT_MAX_DAILY_SUBMISSIONS: u32 = 10;

/// Root application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub global: GlobalConfig,
    #[serde(default)]
    pub plugins: HashMap<String, PluginRegistration>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Handle of the bot account mentions are addressed to.
    pub bot_id: String,
    #[serde(default)]
    pub default_status: SubmissionStatus,
    #[serde(default = "default_max_daily")]
    pub max_daily_submissions_per_user: u32,
    /// Platform name → blacklisted handles.
    #[serde(default)]
    pub blacklist: HashMap<String, Vec<String>>,
}

fn default_max_daily() -> u32 {
    DEFAULT_MAX_DAILY_SUBMISSIONS
}

impl GlobalConfig {
    /// Case-insensitive blacklist check for `handle` on `platform`.
    pub fn is_blacklisted(&self, platform: &str, handle: &str) -> bool {
        self.blacklist
            .get(platform)
            .is_some_and(|list| list.iter().any(|h| h.eq_ignore_ascii_case(handle)))
    }

    /// Whether `handle` is the bot itself.
    pub fn is_bot(&self, handle: &str) -> bool {
        self.bot_id.eq_ignore_ascii_case(handle)
    }
}

/// Plugin registry entry: where to load a named plugin from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRegistration {
    #[serde(rename = "type")]
    pub kind: PluginKind,
    pub url: String,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub outputs: FeedOutputs,
}

impl FeedConfig {
    /// Case-insensitive approver check.
    pub fn is_approver(&self, handle: &str) -> bool {
        self.moderation
            .approvers
            .twitter
            .iter()
            .any(|a| a.eq_ignore_ascii_case(handle))
    }

    /// The stream output, if enabled.
    pub fn enabled_stream(&self) -> Option<&StreamConfig> {
        self.outputs.stream.as_ref().filter(|s| s.enabled)
    }

    /// The recap output, if enabled.
    pub fn enabled_recap(&self) -> Option<&RecapConfig> {
        self.outputs.recap.as_ref().filter(|r| r.enabled)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default)]
    pub approvers: Approvers,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Approvers {
    #[serde(default)]
    pub twitter: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedOutputs {
    #[serde(default)]
    pub stream: Option<StreamConfig>,
    #[serde(default)]
    pub recap: Option<RecapConfig>,
}

/// Per-item output: runs on every approval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    pub enabled: bool,
    #[serde(default)]
    pub transform: Vec<TransformConfig>,
    #[serde(default)]
    pub distribute: Vec<DistributorConfig>,
}

/// Scheduled digest output over approved items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecapConfig {
    pub enabled: bool,
    /// Cron expression (5 or 6 fields).
    pub schedule: String,
    #[serde(default)]
    pub transform: Vec<TransformConfig>,
    #[serde(default)]
    pub batch_transform: Vec<TransformConfig>,
    #[serde(default)]
    pub distribute: Vec<DistributorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub plugin: String,
    #[serde(default = "empty_object")]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    pub plugin: String,
    #[serde(default = "empty_object")]
    pub config: Value,
    /// Transforms applied only for this distributor.
    #[serde(default)]
    pub transform: Vec<TransformConfig>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl AppConfig {
    /// Load, hydrate and parse the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&raw, |name| std::env::var(name).ok())?;
        info!(path = %path.display(), feeds = config.feeds.len(), "Configuration loaded");
        Ok(config)
    }

    /// Parse a config document, resolving `{ENV_VAR}` placeholders via `lookup`.
    pub fn from_json_str(
        raw: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let hydrated = hydrate_env_values(value, &lookup);
        let config: AppConfig = serde_json::from_value(hydrated)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.global.bot_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "global.botId".into(),
                message: "must not be empty".into(),
            });
        }
        for feed in &self.feeds {
            if let Some(recap) = feed.enabled_recap()
                && let Err(e) = crate::curation::recap::parse_schedule(&recap.schedule)
            {
                return Err(ConfigError::InvalidValue {
                    key: format!("feeds.{}.outputs.recap.schedule", feed.id),
                    message: e,
                });
            }
        }
        Ok(())
    }

    /// Find a feed by its exact id. Hashtag matching is case-insensitive,
    /// stored feed ids are not.
    pub fn feed(&self, id: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.id == id)
    }

    /// Every distinct approver handle across all feeds.
    pub fn approver_handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = Vec::new();
        for feed in &self.feeds {
            for handle in &feed.moderation.approvers.twitter {
                if !handles.iter().any(|h| h.eq_ignore_ascii_case(handle)) {
                    handles.push(handle.clone());
                }
            }
        }
        handles
    }
}

static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([A-Z_][A-Z0-9_]*)\}$").unwrap());

/// Recursively replace `"{ENV_VAR}"` string values.
///
/// A placeholder whose variable is unset is logged and becomes an empty string.
pub fn hydrate_env_values(value: Value, lookup: &impl Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::String(s) => match ENV_PLACEHOLDER.captures(&s) {
            Some(caps) => {
                let name = &caps[1];
                match lookup(name) {
                    Some(v) => Value::String(v),
                    None => {
                        error!(var = %name, "Required environment variable is not set");
                        Value::String(String::new())
                    }
                }
            }
            None => Value::String(s),
        },
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| hydrate_env_values(v, lookup))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, hydrate_env_values(v, lookup)))
                .collect(),
        ),
        other => other,
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub http_port: u16,
    pub poll_interval: Duration,
    pub production: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let production = std::env::var("CURATE_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let default_config = if production {
            "../curate.config.json"
        } else {
            "./curate.config.json"
        };
        Self {
            config_path: std::env::var("CURATE_CONFIG_PATH")
                .unwrap_or_else(|_| default_config.to_string())
                .into(),
            db_path: std::env::var("CURATE_DB_PATH")
                .unwrap_or_else(|_| "./data/curate.db".to_string())
                .into(),
            http_port: std::env::var("CURATE_HTTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3000),
            poll_interval: Duration::from_secs(
                std::env::var("CURATE_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            production,
        }
    }
}

/// Plugin manager tuning.
#[derive(Debug, Clone)]
pub struct PluginManagerConfig {
    /// How long a configured instance stays valid.
    pub instance_ttl: Duration,
    /// How long loaded module code stays valid before re-fetching.
    pub module_ttl: Duration,
    /// Failures after which an instance key is disabled until reload.
    pub max_auth_failures: u32,
    /// Delays between initialization attempts.
    pub retry_delays: Vec<Duration>,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self::for_environment(false)
    }
}

impl PluginManagerConfig {
    pub fn for_environment(production: bool) -> Self {
        Self {
            instance_ttl: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            module_ttl: if production {
                Duration::from_secs(30 * 60)
            } else {
                Duration::from_secs(10)
            },
            max_auth_failures: 2, // one below the attempt budget
            retry_delays: vec![Duration::from_secs(1), Duration::from_secs(5)],
        }
    }
}

/// Mention polling settings.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub poll_interval: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}
