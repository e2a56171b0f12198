//! Error types for the curation bot.

use crate::pipeline::transform::TransformStage;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

impl Error {
    /// Whether this error originated inside plugin code or plugin loading.
    pub fn is_plugin_error(&self) -> bool {
        matches!(self, Error::Plugin(_))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Fragments of driver messages that indicate a retryable condition.
const TRANSIENT_MARKERS: &[&str] = &[
    "database is locked",
    "database table is locked",
    "busy",
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "broken pipe",
    "serialization failure",
    "deadlock",
];

impl DatabaseError {
    /// Classify a driver error message for operation `op`.
    ///
    /// Connection, lock and serialization conflicts become `Transient`;
    /// uniqueness/foreign-key failures become `Constraint`; the rest `Query`.
    pub fn classify(op: &str, message: impl std::fmt::Display) -> Self {
        let message = message.to_string();
        let lower = message.to_lowercase();
        if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
            DatabaseError::Transient(format!("{op}: {message}"))
        } else if lower.contains("constraint") {
            DatabaseError::Constraint(format!("{op}: {message}"))
        } else {
            DatabaseError::Query(format!("{op}: {message}"))
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Transient(_) | DatabaseError::Pool(_))
    }
}

/// Plugin lifecycle errors: loading, initialization and execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("Failed to load plugin {name} from {url}: {reason}")]
    Load {
        name: String,
        url: String,
        reason: String,
    },

    #[error("Failed to initialize plugin {name}: {reason}")]
    Init { name: String, reason: String },

    #[error("Plugin {name} failed during {operation}: {reason}")]
    Execution {
        name: String,
        operation: String,
        reason: String,
    },

    #[error("Plugin {name} disabled after {failures} initialization failures")]
    Disabled { name: String, failures: u32 },

    #[error("Cannot derive instance key for plugin {name}: {reason}")]
    Key { name: String, reason: String },

    #[error("Some plugins failed to shutdown properly ({}): {}", .failures.len(), .failures.join("; "))]
    Shutdown { failures: Vec<String> },

    #[error("Unexpected error with plugin {name}: {reason}")]
    Unexpected { name: String, reason: String },
}

/// A transform step failed. Identifies the exact stage and step.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Transform error in {stage} transform #{} ({plugin}): {message}", .index + 1)]
pub struct TransformError {
    pub plugin: String,
    pub stage: TransformStage,
    pub index: usize,
    pub message: String,
}

/// Total delivery failure: every distributor for an item failed.
#[derive(Debug, thiserror::Error)]
#[error("Processing error for feed {feed_id}: {message}")]
pub struct ProcessorError {
    pub feed_id: String,
    pub message: String,
    /// Per-distributor failures, in distributor order.
    pub causes: Vec<Error>,
}

impl ProcessorError {
    pub fn new(feed_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn with_causes(mut self, causes: Vec<Error>) -> Self {
        self.causes = causes;
        self
    }
}

/// Mention-source (social platform) errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to fetch mentions: {0}")]
    Fetch(String),

    #[error("Message {id} not found")]
    NotFound { id: String },

    #[error("Failed to {action} message {id}: {reason}")]
    Action {
        action: String,
        id: String,
        reason: String,
    },

    #[error("Failed to resolve user @{handle}: {reason}")]
    UserLookup { handle: String, reason: String },
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
