//! Exponential backoff retry for storage calls.
//!
//! [`RetryingStore`] wraps any [`CurationStore`] and retries operations that
//! fail with a transient [`DatabaseError`] (lock contention, timeouts,
//! connection resets). Every other error is returned immediately.
//! [`with_default`] turns a failed read into a safe default at call sites
//! where one exists.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::curation::model::{
    FeedRecord, FeedSubmission, ModerationRecord, Submission, SubmissionFeedLink,
    SubmissionStatus, SubmissionWithFeeds,
};
use crate::error::DatabaseError;
use crate::store::traits::CurationStore;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3).
    pub max_retries: u32,
    /// Exponential growth factor (default: 2).
    pub factor: u32,
    /// Delay before the first retry (default: 100 ms).
    pub min_delay: Duration,
    /// Upper bound on any single delay (default: 3 s).
    pub max_delay: Duration,
    /// Multiply each delay by a random factor in `1.0..2.0`.
    pub randomize: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            factor: 2,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(3),
            randomize: true,
        }
    }
}

/// Delay before retry `attempt` (0-indexed).
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = u64::from(config.factor).saturating_pow(attempt);
    let base_ms = (config.min_delay.as_millis() as u64).saturating_mul(exp);
    let jittered_ms = if config.randomize {
        (base_ms as f64 * rand::thread_rng().gen_range(1.0..2.0)) as u64
    } else {
        base_ms
    };
    Duration::from_millis(jittered_ms.min(config.max_delay.as_millis() as u64))
}

/// Run `operation`, retrying transient failures with exponential backoff.
pub async fn execute_with_retry<T, F, Fut>(
    config: &RetryConfig,
    op: &str,
    mut operation: F,
) -> Result<T, DatabaseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DatabaseError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(op, attempt, "Database operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = compute_delay(config, attempt);
                attempt += 1;
                warn!(
                    op,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Database operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Await a read, logging a failure and returning `default` instead.
pub async fn with_default<T, Fut>(op: &str, default: T, read: Fut) -> T
where
    Fut: Future<Output = Result<T, DatabaseError>>,
{
    match read.await {
        Ok(value) => value,
        Err(e) => {
            error!(op, error = %e, "Database read failed, using default");
            default
        }
    }
}

/// A store wrapper that retries transient failures.
pub struct RetryingStore<S> {
    inner: S,
    config: RetryConfig,
}

impl<S: CurationStore> RetryingStore<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: CurationStore> CurationStore for RetryingStore<S> {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn upsert_feeds(&self, feeds: &[FeedRecord]) -> Result<(), DatabaseError> {
        execute_with_retry(&self.config, "upsert_feeds", || self.inner.upsert_feeds(feeds)).await
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), DatabaseError> {
        execute_with_retry(&self.config, "save_submission", || {
            self.inner.save_submission(submission)
        })
        .await
    }

    async fn get_submission(&self, tweet_id: &str) -> Result<Option<Submission>, DatabaseError> {
        execute_with_retry(&self.config, "get_submission", || {
            self.inner.get_submission(tweet_id)
        })
        .await
    }

    async fn get_submission_by_curator_tweet_id(
        &self,
        curator_tweet_id: &str,
    ) -> Result<Option<Submission>, DatabaseError> {
        execute_with_retry(&self.config, "get_submission_by_curator_tweet_id", || {
            self.inner.get_submission_by_curator_tweet_id(curator_tweet_id)
        })
        .await
    }

    async fn get_all_submissions(
        &self,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<SubmissionWithFeeds>, DatabaseError> {
        execute_with_retry(&self.config, "get_all_submissions", || {
            self.inner.get_all_submissions(status)
        })
        .await
    }

    async fn save_submission_to_feed(
        &self,
        submission_id: &str,
        feed_id: &str,
        status: SubmissionStatus,
    ) -> Result<(), DatabaseError> {
        execute_with_retry(&self.config, "save_submission_to_feed", || {
            self.inner.save_submission_to_feed(submission_id, feed_id, status)
        })
        .await
    }

    async fn update_submission_feed_status(
        &self,
        submission_id: &str,
        feed_id: &str,
        status: SubmissionStatus,
        moderation_response_tweet_id: &str,
    ) -> Result<bool, DatabaseError> {
        execute_with_retry(&self.config, "update_submission_feed_status", || {
            self.inner.update_submission_feed_status(
                submission_id,
                feed_id,
                status,
                moderation_response_tweet_id,
            )
        })
        .await
    }

    async fn get_feeds_by_submission(
        &self,
        submission_id: &str,
    ) -> Result<Vec<SubmissionFeedLink>, DatabaseError> {
        execute_with_retry(&self.config, "get_feeds_by_submission", || {
            self.inner.get_feeds_by_submission(submission_id)
        })
        .await
    }

    async fn get_feed_submissions(
        &self,
        feed_id: &str,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<FeedSubmission>, DatabaseError> {
        execute_with_retry(&self.config, "get_feed_submissions", || {
            self.inner.get_feed_submissions(feed_id, status)
        })
        .await
    }

    async fn save_moderation_action(&self, record: &ModerationRecord) -> Result<(), DatabaseError> {
        execute_with_retry(&self.config, "save_moderation_action", || {
            self.inner.save_moderation_action(record)
        })
        .await
    }

    async fn get_moderation_history(
        &self,
        tweet_id: &str,
    ) -> Result<Vec<ModerationRecord>, DatabaseError> {
        execute_with_retry(&self.config, "get_moderation_history", || {
            self.inner.get_moderation_history(tweet_id)
        })
        .await
    }

    async fn get_daily_count(&self, user_id: &str) -> Result<u32, DatabaseError> {
        execute_with_retry(&self.config, "get_daily_count", || {
            self.inner.get_daily_count(user_id)
        })
        .await
    }

    async fn increment_daily_count(&self, user_id: &str) -> Result<(), DatabaseError> {
        execute_with_retry(&self.config, "increment_daily_count", || {
            self.inner.increment_daily_count(user_id)
        })
        .await
    }

    async fn get_cache_value(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        execute_with_retry(&self.config, "get_cache_value", || self.inner.get_cache_value(key)).await
    }

    async fn set_cache_value(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        execute_with_retry(&self.config, "set_cache_value", || {
            self.inner.set_cache_value(key, value)
        })
        .await
    }

    async fn delete_cache_value(&self, key: &str) -> Result<(), DatabaseError> {
        execute_with_retry(&self.config, "delete_cache_value", || {
            self.inner.delete_cache_value(key)
        })
        .await
    }
}
