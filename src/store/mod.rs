//! Persistence layer: libSQL-backed storage for submissions, moderation and cache.

pub mod libsql_backend;
pub mod migrations;
pub mod retry;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use retry::{RetryConfig, RetryingStore};
pub use traits::CurationStore;
