//! Curation data model: submissions, per-feed links and moderation records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Moderation state of one (submission, feed) link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "approved" => Ok(SubmissionStatus::Approved),
            "rejected" => Ok(SubmissionStatus::Rejected),
            other => Err(format!("unknown submission status: {other}")),
        }
    }
}

/// A nominated content item, identified by the original message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub tweet_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub curator_id: String,
    pub curator_username: String,
    /// The mention that nominated this submission.
    pub curator_tweet_id: String,
    pub curator_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

/// Moderation state of a submission within one feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFeedLink {
    pub submission_id: String,
    pub feed_id: String,
    pub status: SubmissionStatus,
    /// Moderation message that caused the last transition.
    pub moderation_response_tweet_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionFeedLink {
    pub fn is_pending(&self) -> bool {
        self.status == SubmissionStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approve,
    Reject,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Approve => "approve",
            ModerationAction::Reject => "reject",
        }
    }

    /// Link status this action transitions to.
    pub fn resulting_status(&self) -> SubmissionStatus {
        match self {
            ModerationAction::Approve => SubmissionStatus::Approved,
            ModerationAction::Reject => SubmissionStatus::Rejected,
        }
    }
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ModerationAction::Approve),
            "reject" => Ok(ModerationAction::Reject),
            other => Err(format!("unknown moderation action: {other}")),
        }
    }
}

/// Append-only moderation log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRecord {
    /// Submission the action targets.
    pub tweet_id: String,
    pub feed_id: String,
    /// Handle of the acting approver.
    pub admin_id: String,
    pub action: ModerationAction,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Persisted feed row; mirrors the configured feed definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// A submission with its per-feed links and moderation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionWithFeeds {
    #[serde(flatten)]
    pub submission: Submission,
    pub feeds: Vec<SubmissionFeedLink>,
    pub moderation_history: Vec<ModerationRecord>,
}

impl SubmissionWithFeeds {
    /// One status summarizing all links, for display: pending beats
    /// rejected beats approved. A submission without links reads as pending.
    ///
    /// Workflow decisions always use the per-feed link status instead.
    pub fn overall_status(&self) -> SubmissionStatus {
        let has = |s: SubmissionStatus| self.feeds.iter().any(|l| l.status == s);
        if has(SubmissionStatus::Pending) || self.feeds.is_empty() {
            SubmissionStatus::Pending
        } else if has(SubmissionStatus::Rejected) {
            SubmissionStatus::Rejected
        } else {
            SubmissionStatus::Approved
        }
    }
}

/// An approved (or otherwise filtered) submission in one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSubmission {
    pub submission: Submission,
    pub link: SubmissionFeedLink,
}
