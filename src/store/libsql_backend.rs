//! libSQL backend: async `CurationStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::curation::model::{
    FeedRecord, FeedSubmission, ModerationAction, ModerationRecord, Submission,
    SubmissionFeedLink, SubmissionStatus, SubmissionWithFeeds,
};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::CurationStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn exists(&self, op: &'static str, sql: &str, id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![id])
            .await
            .map_err(db_err(op))?;
        Ok(rows.next().await.map_err(db_err(op))?.is_some())
    }

    async fn query_submission(
        &self,
        op: &'static str,
        column: &str,
        value: &str,
    ) -> Result<Option<Submission>, DatabaseError> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE {column} = ?1 LIMIT 1");
        let mut rows = self
            .conn()
            .query(&sql, params![value])
            .await
            .map_err(db_err(op))?;
        match rows.next().await.map_err(db_err(op))? {
            Some(row) => Ok(Some(row_to_submission(&row).map_err(db_err(op))?)),
            None => Ok(None),
        }
    }

    async fn query_links(
        &self,
        submission_id: &str,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<SubmissionFeedLink>, DatabaseError> {
        let op = "get_feeds_by_submission";
        let mut rows = match status {
            Some(status) => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {LINK_COLUMNS} FROM submission_feeds
                             WHERE submission_id = ?1 AND status = ?2 ORDER BY created_at, feed_id"
                        ),
                        params![submission_id, status.as_str()],
                    )
                    .await
            }
            None => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {LINK_COLUMNS} FROM submission_feeds
                             WHERE submission_id = ?1 ORDER BY created_at, feed_id"
                        ),
                        params![submission_id],
                    )
                    .await
            }
        }
        .map_err(db_err(op))?;

        let mut links = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err(op))? {
            links.push(row_to_link(&row, 0).map_err(db_err(op))?);
        }
        Ok(links)
    }
}

// ── Helper functions ────────────────────────────────────────────────

const SUBMISSION_COLUMNS: &str = "tweet_id, user_id, username, content, curator_id, \
     curator_username, curator_tweet_id, curator_notes, created_at, submitted_at";

const LINK_COLUMNS: &str =
    "submission_id, feed_id, status, moderation_response_tweet_id, created_at, updated_at";

/// Submission columns followed by link columns (link offset 10).
const FEED_SUBMISSION_COLUMNS: &str = "s.tweet_id, s.user_id, s.username, s.content, \
     s.curator_id, s.curator_username, s.curator_tweet_id, s.curator_notes, s.created_at, \
     s.submitted_at, sf.submission_id, sf.feed_id, sf.status, sf.moderation_response_tweet_id, \
     sf.created_at, sf.updated_at";

/// Map a libsql error for operation `op`, keeping transient conditions retryable.
fn db_err(op: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::classify(op, e)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Calendar date used for daily quota resets.
fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

fn row_to_submission(row: &libsql::Row) -> Result<Submission, libsql::Error> {
    Ok(Submission {
        tweet_id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        content: row.get(3)?,
        curator_id: row.get(4)?,
        curator_username: row.get(5)?,
        curator_tweet_id: row.get(6)?,
        curator_notes: row.get::<String>(7).ok(),
        created_at: parse_datetime(&row.get::<String>(8)?),
        submitted_at: parse_datetime(&row.get::<String>(9)?),
    })
}

/// Map link columns starting at `offset` (column order matches LINK_COLUMNS).
fn row_to_link(row: &libsql::Row, offset: i32) -> Result<SubmissionFeedLink, libsql::Error> {
    let status: String = row.get(offset + 2)?;
    Ok(SubmissionFeedLink {
        submission_id: row.get(offset)?,
        feed_id: row.get(offset + 1)?,
        status: status.parse().unwrap_or_default(),
        moderation_response_tweet_id: row.get::<String>(offset + 3).ok(),
        created_at: parse_datetime(&row.get::<String>(offset + 4)?),
        updated_at: parse_datetime(&row.get::<String>(offset + 5)?),
    })
}

fn row_to_moderation(row: &libsql::Row) -> Result<ModerationRecord, libsql::Error> {
    let action: String = row.get(3)?;
    Ok(ModerationRecord {
        tweet_id: row.get(0)?,
        feed_id: row.get(1)?,
        admin_id: row.get(2)?,
        action: action.parse().unwrap_or(ModerationAction::Reject),
        note: row.get::<String>(4).ok(),
        timestamp: parse_datetime(&row.get::<String>(5)?),
    })
}

// ── CurationStore impl ──────────────────────────────────────────────

#[async_trait]
impl CurationStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Feeds ───────────────────────────────────────────────────────

    async fn upsert_feeds(&self, feeds: &[FeedRecord]) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        for feed in feeds {
            conn.execute(
                "INSERT INTO feeds (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (id) DO UPDATE SET name = ?2, description = ?3",
                params![
                    feed.id.as_str(),
                    feed.name.as_str(),
                    feed.description.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err("upsert_feeds"))?;
        }
        debug!(count = feeds.len(), "Feeds upserted");
        Ok(())
    }

    // ── Submissions ─────────────────────────────────────────────────

    async fn save_submission(&self, submission: &Submission) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO submissions ({SUBMISSION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    submission.tweet_id.as_str(),
                    submission.user_id.as_str(),
                    submission.username.as_str(),
                    submission.content.as_str(),
                    submission.curator_id.as_str(),
                    submission.curator_username.as_str(),
                    submission.curator_tweet_id.as_str(),
                    opt_text(submission.curator_notes.as_deref()),
                    submission.created_at.to_rfc3339(),
                    submission.submitted_at.to_rfc3339()
                ],
            )
            .await
            .map_err(db_err("save_submission"))?;
        Ok(())
    }

    async fn get_submission(&self, tweet_id: &str) -> Result<Option<Submission>, DatabaseError> {
        self.query_submission("get_submission", "tweet_id", tweet_id).await
    }

    async fn get_submission_by_curator_tweet_id(
        &self,
        curator_tweet_id: &str,
    ) -> Result<Option<Submission>, DatabaseError> {
        self.query_submission(
            "get_submission_by_curator_tweet_id",
            "curator_tweet_id",
            curator_tweet_id,
        )
        .await
    }

    async fn get_all_submissions(
        &self,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<SubmissionWithFeeds>, DatabaseError> {
        let op = "get_all_submissions";
        let mut rows = match status {
            Some(status) => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {SUBMISSION_COLUMNS} FROM submissions s
                             WHERE EXISTS (SELECT 1 FROM submission_feeds sf
                                           WHERE sf.submission_id = s.tweet_id AND sf.status = ?1)
                             ORDER BY created_at"
                        ),
                        params![status.as_str()],
                    )
                    .await
            }
            None => {
                self.conn()
                    .query(
                        &format!("SELECT {SUBMISSION_COLUMNS} FROM submissions ORDER BY created_at"),
                        (),
                    )
                    .await
            }
        }
        .map_err(db_err(op))?;

        let mut submissions = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err(op))? {
            submissions.push(row_to_submission(&row).map_err(db_err(op))?);
        }

        let mut result = Vec::with_capacity(submissions.len());
        for submission in submissions {
            let feeds = self.query_links(&submission.tweet_id, status).await?;
            let moderation_history = self.get_moderation_history(&submission.tweet_id).await?;
            result.push(SubmissionWithFeeds {
                submission,
                feeds,
                moderation_history,
            });
        }
        Ok(result)
    }

    // ── Feed links ──────────────────────────────────────────────────

    async fn save_submission_to_feed(
        &self,
        submission_id: &str,
        feed_id: &str,
        status: SubmissionStatus,
    ) -> Result<(), DatabaseError> {
        let op = "save_submission_to_feed";
        if !self
            .exists(op, "SELECT 1 FROM submissions WHERE tweet_id = ?1", submission_id)
            .await?
        {
            return Err(DatabaseError::NotFound {
                entity: "submission".into(),
                id: submission_id.to_string(),
            });
        }
        if !self.exists(op, "SELECT 1 FROM feeds WHERE id = ?1", feed_id).await? {
            return Err(DatabaseError::NotFound {
                entity: "feed".into(),
                id: feed_id.to_string(),
            });
        }

        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO submission_feeds (submission_id, feed_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (submission_id, feed_id) DO NOTHING",
                params![submission_id, feed_id, status.as_str(), now.as_str()],
            )
            .await
            .map_err(db_err(op))?;
        Ok(())
    }

    async fn update_submission_feed_status(
        &self,
        submission_id: &str,
        feed_id: &str,
        status: SubmissionStatus,
        moderation_response_tweet_id: &str,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE submission_feeds
                 SET status = ?3, moderation_response_tweet_id = ?4, updated_at = ?5
                 WHERE submission_id = ?1 AND feed_id = ?2 AND status = 'pending'",
                params![
                    submission_id,
                    feed_id,
                    status.as_str(),
                    moderation_response_tweet_id,
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err("update_submission_feed_status"))?;
        Ok(changed > 0)
    }

    async fn get_feeds_by_submission(
        &self,
        submission_id: &str,
    ) -> Result<Vec<SubmissionFeedLink>, DatabaseError> {
        self.query_links(submission_id, None).await
    }

    async fn get_feed_submissions(
        &self,
        feed_id: &str,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<FeedSubmission>, DatabaseError> {
        let op = "get_feed_submissions";
        let columns = FEED_SUBMISSION_COLUMNS;
        let mut rows = match status {
            Some(status) => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {columns} FROM submission_feeds sf
                             JOIN submissions s ON s.tweet_id = sf.submission_id
                             WHERE sf.feed_id = ?1 AND sf.status = ?2
                             ORDER BY sf.updated_at"
                        ),
                        params![feed_id, status.as_str()],
                    )
                    .await
            }
            None => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {columns} FROM submission_feeds sf
                             JOIN submissions s ON s.tweet_id = sf.submission_id
                             WHERE sf.feed_id = ?1
                             ORDER BY sf.updated_at"
                        ),
                        params![feed_id],
                    )
                    .await
            }
        }
        .map_err(db_err(op))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err(op))? {
            result.push(FeedSubmission {
                submission: row_to_submission(&row).map_err(db_err(op))?,
                link: row_to_link(&row, 10).map_err(db_err(op))?,
            });
        }
        Ok(result)
    }

    // ── Moderation ──────────────────────────────────────────────────

    async fn save_moderation_action(&self, record: &ModerationRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO moderation_history (tweet_id, feed_id, admin_id, action, note, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.tweet_id.as_str(),
                    record.feed_id.as_str(),
                    record.admin_id.as_str(),
                    record.action.as_str(),
                    opt_text(record.note.as_deref()),
                    record.timestamp.to_rfc3339()
                ],
            )
            .await
            .map_err(db_err("save_moderation_action"))?;
        Ok(())
    }

    async fn get_moderation_history(
        &self,
        tweet_id: &str,
    ) -> Result<Vec<ModerationRecord>, DatabaseError> {
        let op = "get_moderation_history";
        let mut rows = self
            .conn()
            .query(
                "SELECT tweet_id, feed_id, admin_id, action, note, created_at
                 FROM moderation_history WHERE tweet_id = ?1 ORDER BY created_at, id",
                params![tweet_id],
            )
            .await
            .map_err(db_err(op))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err(op))? {
            records.push(row_to_moderation(&row).map_err(db_err(op))?);
        }
        Ok(records)
    }

    // ── Daily quota ─────────────────────────────────────────────────

    async fn get_daily_count(&self, user_id: &str) -> Result<u32, DatabaseError> {
        let op = "get_daily_count";
        let today = today();
        self.conn()
            .execute(
                "DELETE FROM submission_counts WHERE last_reset_date < ?1",
                params![today.as_str()],
            )
            .await
            .map_err(db_err(op))?;

        let mut rows = self
            .conn()
            .query(
                "SELECT count FROM submission_counts WHERE user_id = ?1 AND last_reset_date = ?2",
                params![user_id, today.as_str()],
            )
            .await
            .map_err(db_err(op))?;

        match rows.next().await.map_err(db_err(op))? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(db_err(op))?;
                Ok(u32::try_from(count).unwrap_or(0))
            }
            None => Ok(0),
        }
    }

    async fn increment_daily_count(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO submission_counts (user_id, count, last_reset_date) VALUES (?1, 1, ?2)
                 ON CONFLICT (user_id) DO UPDATE SET
                    count = CASE WHEN last_reset_date < ?2 THEN 1 ELSE count + 1 END,
                    last_reset_date = ?2",
                params![user_id, today()],
            )
            .await
            .map_err(db_err("increment_daily_count"))?;
        Ok(())
    }

    // ── Cache ───────────────────────────────────────────────────────

    async fn get_cache_value(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let op = "get_cache_value";
        let mut rows = self
            .conn()
            .query("SELECT value FROM cache WHERE key = ?1", params![key])
            .await
            .map_err(db_err(op))?;
        match rows.next().await.map_err(db_err(op))? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err(op))?)),
            None => Ok(None),
        }
    }

    async fn set_cache_value(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO cache (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, value, now.as_str()],
            )
            .await
            .map_err(db_err("set_cache_value"))?;
        Ok(())
    }

    async fn delete_cache_value(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM cache WHERE key = ?1", params![key])
            .await
            .map_err(db_err("delete_cache_value"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.upsert_feeds(&[
            FeedRecord {
                id: "grants".into(),
                name: "Grants".into(),
                description: String::new(),
            },
            FeedRecord {
                id: "ethereum".into(),
                name: "Ethereum".into(),
                description: "eth news".into(),
            },
        ])
        .await
        .unwrap();
        db
    }

    fn make_submission(tweet_id: &str, curator_tweet_id: &str) -> Submission {
        let now = Utc::now();
        Submission {
            tweet_id: tweet_id.into(),
            user_id: "author-1".into(),
            username: "author".into(),
            content: "big news".into(),
            curator_id: "curator-1".into(),
            curator_username: "curator".into(),
            curator_tweet_id: curator_tweet_id.into(),
            curator_notes: Some("worth a look".into()),
            created_at: now,
            submitted_at: now,
        }
    }

    fn record(feed: &str, admin: &str, action: ModerationAction) -> ModerationRecord {
        ModerationRecord {
            tweet_id: "100".into(),
            feed_id: feed.into(),
            admin_id: admin.into(),
            action,
            note: None,
            timestamp: Utc::now(),
        }
    }

    // ── Submission tests ────────────────────────────────────────────

    #[tokio::test]
    async fn save_and_get_submission() {
        let db = test_db().await;
        let submission = make_submission("100", "200");
        db.save_submission(&submission).await.unwrap();

        let fetched = db.get_submission("100").await.unwrap().unwrap();
        assert_eq!(fetched.content, "big news");
        assert_eq!(fetched.curator_notes.as_deref(), Some("worth a look"));

        let by_curator = db.get_submission_by_curator_tweet_id("200").await.unwrap().unwrap();
        assert_eq!(by_curator.tweet_id, "100");

        assert!(db.get_submission("999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_submission_is_a_constraint_error() {
        let db = test_db().await;
        let submission = make_submission("100", "200");
        db.save_submission(&submission).await.unwrap();
        let err = db.save_submission(&submission).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn submission_without_notes() {
        let db = test_db().await;
        let mut submission = make_submission("100", "200");
        submission.curator_notes = None;
        db.save_submission(&submission).await.unwrap();
        let fetched = db.get_submission("100").await.unwrap().unwrap();
        assert!(fetched.curator_notes.is_none());
    }

    // ── Feed link tests ─────────────────────────────────────────────

    #[tokio::test]
    async fn link_statuses_are_independent_per_feed() {
        let db = test_db().await;
        db.save_submission(&make_submission("100", "200")).await.unwrap();
        db.save_submission_to_feed("100", "grants", SubmissionStatus::Pending).await.unwrap();
        db.save_submission_to_feed("100", "ethereum", SubmissionStatus::Pending).await.unwrap();

        assert!(
            db.update_submission_feed_status("100", "grants", SubmissionStatus::Approved, "300")
                .await
                .unwrap()
        );

        let links = db.get_feeds_by_submission("100").await.unwrap();
        assert_eq!(links.len(), 2);
        let grants = links.iter().find(|l| l.feed_id == "grants").unwrap();
        let ethereum = links.iter().find(|l| l.feed_id == "ethereum").unwrap();
        assert_eq!(grants.status, SubmissionStatus::Approved);
        assert_eq!(grants.moderation_response_tweet_id.as_deref(), Some("300"));
        assert_eq!(ethereum.status, SubmissionStatus::Pending);
        assert!(ethereum.moderation_response_tweet_id.is_none());
    }

    #[tokio::test]
    async fn decided_links_are_terminal() {
        let db = test_db().await;
        db.save_submission(&make_submission("100", "200")).await.unwrap();
        db.save_submission_to_feed("100", "grants", SubmissionStatus::Pending).await.unwrap();

        assert!(
            db.update_submission_feed_status("100", "grants", SubmissionStatus::Rejected, "300")
                .await
                .unwrap()
        );
        assert!(
            !db.update_submission_feed_status("100", "grants", SubmissionStatus::Approved, "301")
                .await
                .unwrap()
        );
        assert!(
            !db.update_submission_feed_status("100", "missing", SubmissionStatus::Approved, "302")
                .await
                .unwrap()
        );

        let links = db.get_feeds_by_submission("100").await.unwrap();
        assert_eq!(links[0].status, SubmissionStatus::Rejected);
        assert_eq!(links[0].moderation_response_tweet_id.as_deref(), Some("300"));
    }

    #[tokio::test]
    async fn existing_link_is_not_overwritten() {
        let db = test_db().await;
        db.save_submission(&make_submission("100", "200")).await.unwrap();
        db.save_submission_to_feed("100", "grants", SubmissionStatus::Approved).await.unwrap();
        db.save_submission_to_feed("100", "grants", SubmissionStatus::Pending).await.unwrap();
        let links = db.get_feeds_by_submission("100").await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].status, SubmissionStatus::Approved);
    }

    #[tokio::test]
    async fn link_requires_submission_and_feed() {
        let db = test_db().await;
        let err = db
            .save_submission_to_feed("missing", "grants", SubmissionStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { ref entity, .. } if entity == "submission"));

        db.save_submission(&make_submission("100", "200")).await.unwrap();
        let err = db
            .save_submission_to_feed("100", "nope", SubmissionStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { ref entity, .. } if entity == "feed"));
    }

    #[tokio::test]
    async fn feed_submissions_filter_by_status() {
        let db = test_db().await;
        db.save_submission(&make_submission("100", "200")).await.unwrap();
        db.save_submission(&make_submission("101", "201")).await.unwrap();
        db.save_submission_to_feed("100", "grants", SubmissionStatus::Approved).await.unwrap();
        db.save_submission_to_feed("101", "grants", SubmissionStatus::Pending).await.unwrap();

        let approved = db
            .get_feed_submissions("grants", Some(SubmissionStatus::Approved))
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].submission.tweet_id, "100");
        assert_eq!(approved[0].link.feed_id, "grants");

        assert_eq!(db.get_feed_submissions("grants", None).await.unwrap().len(), 2);
        assert!(db.get_feed_submissions("ethereum", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_submissions_with_status_filter() {
        let db = test_db().await;
        db.save_submission(&make_submission("100", "200")).await.unwrap();
        db.save_submission(&make_submission("101", "201")).await.unwrap();
        db.save_submission_to_feed("100", "grants", SubmissionStatus::Approved).await.unwrap();
        db.save_submission_to_feed("100", "ethereum", SubmissionStatus::Pending).await.unwrap();
        db.save_submission_to_feed("101", "grants", SubmissionStatus::Rejected).await.unwrap();
        db.save_moderation_action(&record("grants", "alice", ModerationAction::Approve))
            .await
            .unwrap();

        let all = db.get_all_submissions(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let first = all.iter().find(|s| s.submission.tweet_id == "100").unwrap();
        assert_eq!(first.feeds.len(), 2);
        assert_eq!(first.moderation_history.len(), 1);
        assert_eq!(first.overall_status(), SubmissionStatus::Pending);

        let approved = db.get_all_submissions(Some(SubmissionStatus::Approved)).await.unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].feeds.len(), 1);
        assert_eq!(approved[0].feeds[0].feed_id, "grants");
    }

    // ── Moderation tests ────────────────────────────────────────────

    #[tokio::test]
    async fn moderation_history_is_append_only() {
        let db = test_db().await;
        db.save_submission(&make_submission("100", "200")).await.unwrap();
        db.save_moderation_action(&record("grants", "alice", ModerationAction::Approve))
            .await
            .unwrap();
        db.save_moderation_action(&record("grants", "bob", ModerationAction::Reject))
            .await
            .unwrap();

        let history = db.get_moderation_history("100").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].admin_id, "alice");
        assert_eq!(history[0].action, ModerationAction::Approve);
        assert_eq!(history[1].action, ModerationAction::Reject);
    }

    // ── Daily quota tests ───────────────────────────────────────────

    #[tokio::test]
    async fn daily_count_increments() {
        let db = test_db().await;
        assert_eq!(db.get_daily_count("curator-1").await.unwrap(), 0);
        db.increment_daily_count("curator-1").await.unwrap();
        db.increment_daily_count("curator-1").await.unwrap();
        assert_eq!(db.get_daily_count("curator-1").await.unwrap(), 2);
        assert_eq!(db.get_daily_count("curator-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn daily_count_resets_after_past_date() {
        let db = test_db().await;
        db.conn()
            .execute(
                "INSERT INTO submission_counts (user_id, count, last_reset_date) VALUES ('c', 10, '2000-01-01')",
                (),
            )
            .await
            .unwrap();

        db.increment_daily_count("c").await.unwrap();
        assert_eq!(db.get_daily_count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_counts_read_as_zero() {
        let db = test_db().await;
        db.conn()
            .execute(
                "INSERT INTO submission_counts (user_id, count, last_reset_date) VALUES ('c', 10, '2000-01-01')",
                (),
            )
            .await
            .unwrap();
        assert_eq!(db.get_daily_count("c").await.unwrap(), 0);
    }

    // ── Cache tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn cache_crud() {
        let db = test_db().await;
        assert!(db.get_cache_value("last_tweet_id").await.unwrap().is_none());
        db.set_cache_value("last_tweet_id", "1").await.unwrap();
        db.set_cache_value("last_tweet_id", "2").await.unwrap();
        assert_eq!(db.get_cache_value("last_tweet_id").await.unwrap().as_deref(), Some("2"));
        db.delete_cache_value("last_tweet_id").await.unwrap();
        assert!(db.get_cache_value("last_tweet_id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("curate.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.set_cache_value("k", "v").await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(db.get_cache_value("k").await.unwrap().as_deref(), Some("v"));
    }
}
