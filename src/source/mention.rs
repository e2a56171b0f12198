//! Mention model and the mention-source contract.

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// An inbound message on the social platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub id: String,
    pub user_id: String,
    /// Author handle. May be empty when the search result omits it.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub in_reply_to_status_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Mention {
    pub fn has_username(&self) -> bool {
        !self.username.trim().is_empty()
    }

    pub fn ordinal(&self) -> MentionId<'_> {
        MentionId::new(&self.id)
    }
}

/// A platform message id ordered as an unbounded non-negative integer.
///
/// Ids are wider than 64 bits can be trusted to hold, so they are compared
/// as digit strings: leading zeros stripped, shorter is smaller, equal
/// lengths compare lexicographically.
#[derive(Debug, Clone, Copy)]
pub struct MentionId<'a>(&'a str);

impl<'a> MentionId<'a> {
    pub fn new(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        let digits = trimmed.trim_start_matches('0');
        Self(if digits.is_empty() && !trimmed.is_empty() { "0" } else { digits })
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

impl PartialEq for MentionId<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MentionId<'_> {}

impl PartialOrd for MentionId<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MentionId<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(other.0))
    }
}

impl fmt::Display for MentionId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Whether `id` is strictly newer than the high-water mark `mark`.
pub fn is_newer(id: &str, mark: Option<&str>) -> bool {
    match mark {
        Some(mark) => MentionId::new(id) > MentionId::new(mark),
        None => true,
    }
}

/// The platform operations the curation workflow consumes.
#[async_trait]
pub trait MentionSource: Send + Sync {
    /// Mentions newer than the high-water mark, oldest first.
    async fn fetch_all_new_mentions(&self) -> Result<Vec<Mention>, SourceError>;

    async fn get_tweet(&self, id: &str) -> Result<Option<Mention>, SourceError>;

    async fn like_tweet(&self, id: &str) -> Result<(), SourceError>;

    async fn get_user_id_by_handle(&self, handle: &str) -> Result<String, SourceError>;

    /// Move the high-water mark to `id` and persist it.
    async fn set_last_checked_id(&self, id: &str) -> Result<(), SourceError>;
}
