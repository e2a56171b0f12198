//! High-water-mark tracking over a newest-first mention search.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::source::mention::{Mention, MentionSource, is_newer};
use crate::store::CurationStore;

/// Cache key the high-water mark is persisted under.
pub const LAST_CHECKED_KEY: &str = "last_tweet_id";

/// Mentions requested per search.
pub const SEARCH_BATCH_SIZE: usize = 200;

/// Low-level platform client. Search results come back newest first.
#[async_trait]
pub trait MentionSearch: Send + Sync {
    async fn search_mentions(&self, handle: &str, limit: usize)
    -> Result<Vec<Mention>, SourceError>;

    async fn get_tweet(&self, id: &str) -> Result<Option<Mention>, SourceError>;

    async fn like_tweet(&self, id: &str) -> Result<(), SourceError>;

    async fn get_user_id_by_handle(&self, handle: &str) -> Result<String, SourceError>;
}

/// A [`MentionSource`] that remembers the newest id it has handed out.
pub struct WatermarkedSource<S> {
    search: S,
    store: Arc<dyn CurationStore>,
    bot_handle: String,
    mark: RwLock<Option<String>>,
    loaded: RwLock<bool>,
}

impl<S: MentionSearch> WatermarkedSource<S> {
    pub fn new(search: S, store: Arc<dyn CurationStore>, bot_handle: impl Into<String>) -> Self {
        Self {
            search,
            store,
            bot_handle: bot_handle.into(),
            mark: RwLock::new(None),
            loaded: RwLock::new(false),
        }
    }

    /// Current high-water mark, loading it from the cache on first use.
    pub async fn last_checked_id(&self) -> Option<String> {
        if !*self.loaded.read().await {
            let stored = match self.store.get_cache_value(LAST_CHECKED_KEY).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "Failed to load last checked mention id");
                    None
                }
            };
            let mut loaded = self.loaded.write().await;
            if !*loaded {
                if let Some(id) = &stored {
                    info!(last_checked_id = %id, "Restored mention watermark");
                }
                *self.mark.write().await = stored;
                *loaded = true;
            }
        }
        self.mark.read().await.clone()
    }
}

#[async_trait]
impl<S: MentionSearch> MentionSource for WatermarkedSource<S> {
    async fn fetch_all_new_mentions(&self) -> Result<Vec<Mention>, SourceError> {
        let mark = self.last_checked_id().await;
        let batch = self
            .search
            .search_mentions(&format!("@{}", self.bot_handle), SEARCH_BATCH_SIZE)
            .await?;

        let mut fresh: Vec<Mention> = batch
            .iter()
            .filter(|m| is_newer(&m.id, mark.as_deref()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            debug!(batch = batch.len(), "No mentions past the watermark");
            return Ok(fresh);
        }
        fresh.sort_by(|a, b| a.ordinal().cmp(&b.ordinal()));

        if let Some(newest) = batch.iter().max_by(|a, b| a.ordinal().cmp(&b.ordinal())) {
            self.set_last_checked_id(&newest.id).await?;
        }
        Ok(fresh)
    }

    async fn get_tweet(&self, id: &str) -> Result<Option<Mention>, SourceError> {
        self.search.get_tweet(id).await
    }

    async fn like_tweet(&self, id: &str) -> Result<(), SourceError> {
        self.search.like_tweet(id).await
    }

    async fn get_user_id_by_handle(&self, handle: &str) -> Result<String, SourceError> {
        self.search.get_user_id_by_handle(handle).await
    }

    async fn set_last_checked_id(&self, id: &str) -> Result<(), SourceError> {
        self.store
            .set_cache_value(LAST_CHECKED_KEY, id)
            .await
            .map_err(|e| SourceError::Action {
                action: "persist watermark for".into(),
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        *self.mark.write().await = Some(id.to_string());
        *self.loaded.write().await = true;
        Ok(())
    }
}
