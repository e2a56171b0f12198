//! `CurationStore` trait: single async interface for curation persistence.

use async_trait::async_trait;

use crate::curation::model::{
    FeedRecord, FeedSubmission, ModerationRecord, Submission, SubmissionFeedLink,
    SubmissionStatus, SubmissionWithFeeds,
};
use crate::error::DatabaseError;

/// Backend-agnostic storage for submissions, feed links, moderation history,
/// daily quotas and the key/value cache.
#[async_trait]
pub trait CurationStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Feeds ───────────────────────────────────────────────────────

    /// Insert or update feed rows (name/description) by id.
    async fn upsert_feeds(&self, feeds: &[FeedRecord]) -> Result<(), DatabaseError>;

    // ── Submissions ─────────────────────────────────────────────────

    /// Insert a new submission. Fails if the id already exists.
    async fn save_submission(&self, submission: &Submission) -> Result<(), DatabaseError>;

    async fn get_submission(&self, tweet_id: &str) -> Result<Option<Submission>, DatabaseError>;

    async fn get_submission_by_curator_tweet_id(
        &self,
        curator_tweet_id: &str,
    ) -> Result<Option<Submission>, DatabaseError>;

    /// All submissions with feeds and history. With `status`, only
    /// submissions having at least one link in that status are returned, and
    /// only those links are included.
    async fn get_all_submissions(
        &self,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<SubmissionWithFeeds>, DatabaseError>;

    // ── Feed links ──────────────────────────────────────────────────

    /// Link a submission to a feed. Both must exist; an existing link is
    /// left untouched.
    async fn save_submission_to_feed(
        &self,
        submission_id: &str,
        feed_id: &str,
        status: SubmissionStatus,
    ) -> Result<(), DatabaseError>;

    /// Move a pending link to `status`. Links that already left `pending`
    /// are not touched; returns whether a link was transitioned.
    async fn update_submission_feed_status(
        &self,
        submission_id: &str,
        feed_id: &str,
        status: SubmissionStatus,
        moderation_response_tweet_id: &str,
    ) -> Result<bool, DatabaseError>;

    async fn get_feeds_by_submission(
        &self,
        submission_id: &str,
    ) -> Result<Vec<SubmissionFeedLink>, DatabaseError>;

    /// Submissions linked to `feed_id`, optionally filtered by link status,
    /// oldest link update first.
    async fn get_feed_submissions(
        &self,
        feed_id: &str,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<FeedSubmission>, DatabaseError>;

    // ── Moderation ──────────────────────────────────────────────────

    async fn save_moderation_action(&self, record: &ModerationRecord) -> Result<(), DatabaseError>;

    /// Moderation records for a submission, oldest first.
    async fn get_moderation_history(
        &self,
        tweet_id: &str,
    ) -> Result<Vec<ModerationRecord>, DatabaseError>;

    // ── Daily quota ─────────────────────────────────────────────────

    /// Today's submission count for `user_id`. Rows from earlier days are
    /// purged first.
    async fn get_daily_count(&self, user_id: &str) -> Result<u32, DatabaseError>;

    /// Bump today's count, resetting to 1 if the stored date is in the past.
    async fn increment_daily_count(&self, user_id: &str) -> Result<(), DatabaseError>;

    // ── Cache ───────────────────────────────────────────────────────

    async fn get_cache_value(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    async fn set_cache_value(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    async fn delete_cache_value(&self, key: &str) -> Result<(), DatabaseError>;
}
