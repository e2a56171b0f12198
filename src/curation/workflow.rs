//! Curation workflow: turns mentions into submissions and moderation
//! decisions.
//!
//! Each (submission, feed) link starts at the feed's default status and
//! leaves `pending` at most once. Mentions in a poll are handled strictly in
//! order; a failing mention is logged and the rest of the batch continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, FeedConfig, WorkflowConfig};
use crate::curation::classify::{self, MentionKind};
use crate::curation::model::{
    FeedRecord, ModerationAction, ModerationRecord, Submission, SubmissionFeedLink,
    SubmissionStatus,
};
use crate::error::Result;
use crate::pipeline::{ContentProcessor, ProcessConfig};
use crate::source::{Mention, MentionSource};
use crate::store::CurationStore;
use crate::store::retry::with_default;

/// Cache key for the approver user-id → handle map.
pub const ADMIN_IDS_KEY: &str = "admin_ids";

/// Blacklist section consulted for curators.
const PLATFORM: &str = "twitter";

pub struct CurationWorkflow {
    config: Arc<AppConfig>,
    store: Arc<dyn CurationStore>,
    source: Arc<dyn MentionSource>,
    processor: Arc<ContentProcessor>,
    settings: WorkflowConfig,
    admins: RwLock<HashMap<String, String>>,
    stopped: AtomicBool,
    wake: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CurationWorkflow {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn CurationStore>,
        source: Arc<dyn MentionSource>,
        processor: Arc<ContentProcessor>,
        settings: WorkflowConfig,
    ) -> Self {
        Self {
            config,
            store,
            source,
            processor,
            settings,
            admins: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
            task: Mutex::new(None),
        }
    }

    /// Sync configured feeds into storage and load the admin map.
    pub async fn initialize(&self) -> Result<()> {
        let feeds: Vec<FeedRecord> = self
            .config
            .feeds
            .iter()
            .map(|f| FeedRecord {
                id: f.id.clone(),
                name: f.name.clone(),
                description: f.description.clone(),
            })
            .collect();
        self.store.upsert_feeds(&feeds).await?;

        let admins = self.load_admin_ids().await;
        info!(feeds = feeds.len(), admins = admins.len(), "Curation workflow initialized");
        *self.admins.write().await = admins;
        Ok(())
    }

    /// Cached admin map, with any configured approver it lacks resolved
    /// through the source.
    async fn load_admin_ids(&self) -> HashMap<String, String> {
        let cached = with_default(
            "get_cache_value",
            None,
            self.store.get_cache_value(ADMIN_IDS_KEY),
        )
        .await;
        let mut admins = match cached.map(|raw| serde_json::from_str::<HashMap<String, String>>(&raw)) {
            Some(Ok(map)) => {
                debug!(admins = map.len(), "Loaded admin ids from cache");
                map
            }
            Some(Err(e)) => {
                warn!(error = %e, "Cached admin ids are corrupt, resolving again");
                HashMap::new()
            }
            None => HashMap::new(),
        };
        self.resolve_missing_admins(&mut admins).await;
        admins
    }

    /// Configured approver handles with no entry in `admins`.
    fn unresolved_approvers(&self, admins: &HashMap<String, String>) -> Vec<String> {
        self.config
            .approver_handles()
            .into_iter()
            .filter(|handle| !admins.values().any(|h| h.eq_ignore_ascii_case(handle)))
            .collect()
    }

    /// Look up every unresolved approver. The map is only cached once it
    /// covers all configured approvers.
    async fn resolve_missing_admins(&self, admins: &mut HashMap<String, String>) {
        let missing = self.unresolved_approvers(admins);
        if missing.is_empty() {
            return;
        }

        let mut resolved = 0usize;
        for handle in missing {
            match self.source.get_user_id_by_handle(&handle).await {
                Ok(user_id) => {
                    admins.insert(user_id, handle);
                    resolved += 1;
                }
                Err(e) => warn!(handle = %handle, error = %e, "Approver not resolvable yet"),
            }
        }
        if resolved == 0 {
            return;
        }

        let remaining = self.unresolved_approvers(admins).len();
        if remaining > 0 {
            info!(resolved, remaining, "Admin map incomplete, not caching");
            return;
        }
        match serde_json::to_string(&admins) {
            Ok(raw) => {
                if let Err(e) = self.store.set_cache_value(ADMIN_IDS_KEY, &raw).await {
                    error!(error = %e, "Failed to cache admin ids");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode admin ids"),
        }
    }

    /// Handle for `user_id` if it belongs to an approver, resolving
    /// approvers the source could not identify earlier.
    async fn admin_handle(&self, user_id: &str) -> Option<String> {
        let mut admins = self.admin_ids().await;
        if let Some(handle) = admins.get(user_id) {
            return Some(handle.clone());
        }
        if self.unresolved_approvers(&admins).is_empty() {
            return None;
        }
        self.resolve_missing_admins(&mut admins).await;
        let handle = admins.get(user_id).cloned();
        *self.admins.write().await = admins;
        handle
    }

    /// Admin user id → handle.
    pub async fn admin_ids(&self) -> HashMap<String, String> {
        self.admins.read().await.clone()
    }

    /// Start polling: one check right away, then every poll interval.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() || self.stopped.load(Ordering::Relaxed) {
            return;
        }

        let workflow = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            info!(
                interval_secs = workflow.settings.poll_interval.as_secs(),
                "Mention polling started"
            );
            let mut tick = tokio::time::interval(workflow.settings.poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = workflow.wake.notified() => {}
                }
                if workflow.stopped.load(Ordering::Relaxed) {
                    info!("Mention polling stopped");
                    return;
                }
                workflow.check_mentions().await;
            }
        }));
    }

    /// Stop polling. A check already in progress runs to completion.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::Relaxed) {
            return;
        }
        self.wake.notify_one();
        let task = self.task.lock().await.take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(error = %e, "Mention polling task failed");
        }
    }

    /// Fetch and handle every new mention, oldest first.
    pub async fn check_mentions(&self) {
        let mentions = match self.source.fetch_all_new_mentions().await {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "Error checking mentions");
                return;
            }
        };
        if mentions.is_empty() {
            debug!("No new mentions");
            return;
        }
        info!(count = mentions.len(), "Found new mentions");

        for mention in &mentions {
            let outcome = match classify::classify(&mention.text) {
                Some(MentionKind::Submission) => {
                    info!(tweet_id = %mention.id, "Received new submission");
                    self.handle_submission(mention).await
                }
                Some(MentionKind::Moderation(action)) => {
                    info!(tweet_id = %mention.id, %action, "Received new moderation");
                    self.handle_moderation(mention, action).await
                }
                None => Ok(()),
            };
            if let Err(e) = outcome {
                error!(tweet_id = %mention.id, error = %e, "Error processing mention");
            }
        }
    }

    async fn handle_submission(&self, mention: &Mention) -> Result<()> {
        let Some(original_id) = mention.in_reply_to_status_id.as_deref() else {
            warn!(tweet_id = %mention.id, "Submission is not a reply");
            return Ok(());
        };

        let curator = match self.source.get_tweet(&mention.id).await? {
            Some(t) if t.has_username() => t,
            _ => {
                error!(tweet_id = %mention.id, "Could not fetch curator tweet details");
                return Ok(());
            }
        };
        if self.config.global.is_bot(&curator.username)
            || self.config.global.is_blacklisted(PLATFORM, &curator.username)
        {
            warn!(tweet_id = %mention.id, curator = %curator.username, "Submitted by bot or blacklisted user");
            return Ok(());
        }

        let feeds = classify::target_feeds(&mention.hashtags, &self.config.feeds);
        if feeds.is_empty() {
            warn!(tweet_id = %mention.id, hashtags = ?mention.hashtags, "No valid feeds in submission");
            return Ok(());
        }

        let Some(original) = self.source.get_tweet(original_id).await? else {
            error!(tweet_id = %mention.id, original_id = %original_id, "Could not fetch original tweet");
            return Ok(());
        };

        let existing = with_default(
            "get_submission",
            None,
            self.store.get_submission(&original.id),
        )
        .await;
        let (submission, links) = match existing {
            Some(submission) => {
                // Links decide what gets written next, so a failed read aborts.
                let links = self
                    .store
                    .get_feeds_by_submission(&submission.tweet_id)
                    .await?;
                (submission, links)
            }
            None => {
                let count = with_default(
                    "get_daily_count",
                    0,
                    self.store.get_daily_count(&mention.user_id),
                )
                .await;
                if count >= self.config.global.max_daily_submissions_per_user {
                    warn!(
                        tweet_id = %mention.id,
                        user_id = %mention.user_id,
                        count,
                        "Daily submission limit reached"
                    );
                    return Ok(());
                }

                let submission = Submission {
                    tweet_id: original.id.clone(),
                    user_id: original.user_id.clone(),
                    username: original.username.clone(),
                    content: original.text.clone(),
                    curator_id: mention.user_id.clone(),
                    curator_username: curator.username.clone(),
                    curator_tweet_id: mention.id.clone(),
                    curator_notes: classify::extract_description(&original.username, mention),
                    created_at: original.created_at,
                    submitted_at: Utc::now(),
                };
                self.store.save_submission(&submission).await?;
                self.store.increment_daily_count(&mention.user_id).await?;
                (submission, Vec::new())
            }
        };

        for feed in feeds {
            if let Err(e) = self
                .submit_to_feed(feed, &submission, &links, &curator, mention)
                .await
            {
                error!(tweet_id = %mention.id, feed_id = %feed.id, error = %e, "Failed to add submission to feed");
            }
        }

        self.acknowledge(mention).await;
        info!(tweet_id = %mention.id, original_id = %original.id, "Processed submission");
        Ok(())
    }

    async fn submit_to_feed(
        &self,
        feed: &FeedConfig,
        submission: &Submission,
        links: &[SubmissionFeedLink],
        curator: &Mention,
        mention: &Mention,
    ) -> Result<()> {
        let is_approver = feed.is_approver(&curator.username);
        match links.iter().find(|l| l.feed_id == feed.id) {
            Some(link) => {
                if link.is_pending() && is_approver {
                    self.auto_approve(feed, submission, curator, mention).await?;
                } else {
                    debug!(feed_id = %feed.id, status = %link.status, "Submission already in feed");
                }
            }
            None => {
                self.store
                    .save_submission_to_feed(
                        &submission.tweet_id,
                        &feed.id,
                        self.config.global.default_status,
                    )
                    .await?;
                if is_approver {
                    self.auto_approve(feed, submission, curator, mention).await?;
                }
            }
        }
        Ok(())
    }

    /// An approver curating into their own feed skips moderation.
    async fn auto_approve(
        &self,
        feed: &FeedConfig,
        submission: &Submission,
        curator: &Mention,
        mention: &Mention,
    ) -> Result<()> {
        let transitioned = self
            .store
            .update_submission_feed_status(
                &submission.tweet_id,
                &feed.id,
                SubmissionStatus::Approved,
                &mention.id,
            )
            .await?;
        if !transitioned {
            debug!(tweet_id = %submission.tweet_id, feed_id = %feed.id, "Link already decided");
            return Ok(());
        }
        let record = ModerationRecord {
            tweet_id: submission.tweet_id.clone(),
            feed_id: feed.id.clone(),
            admin_id: curator.username.clone(),
            action: ModerationAction::Approve,
            note: classify::extract_description(&submission.username, mention),
            timestamp: curator.created_at,
        };
        self.store.save_moderation_action(&record).await?;
        info!(tweet_id = %submission.tweet_id, feed_id = %feed.id, curator = %curator.username, "Auto-approved submission");
        self.stream(feed, submission).await;
        Ok(())
    }

    async fn handle_moderation(&self, mention: &Mention, action: ModerationAction) -> Result<()> {
        let Some(admin) = self.admin_handle(&mention.user_id).await else {
            warn!(tweet_id = %mention.id, user_id = %mention.user_id, "Moderation from non-admin");
            return Ok(());
        };
        let Some(curator_tweet_id) = mention.in_reply_to_status_id.as_deref() else {
            return Ok(());
        };

        let Some(submission) = with_default(
            "get_submission_by_curator_tweet_id",
            None,
            self.store.get_submission_by_curator_tweet_id(curator_tweet_id),
        )
        .await
        else {
            warn!(tweet_id = %mention.id, curator_tweet_id = %curator_tweet_id, "Moderation for unknown submission");
            return Ok(());
        };

        let links = with_default(
            "get_feeds_by_submission",
            Vec::new(),
            self.store.get_feeds_by_submission(&submission.tweet_id),
        )
        .await;
        let moderatable: Vec<(&SubmissionFeedLink, &FeedConfig)> = links
            .iter()
            .filter(|l| l.is_pending() && l.moderation_response_tweet_id.is_none())
            .filter_map(|l| self.config.feed(&l.feed_id).map(|f| (l, f)))
            .filter(|(_, f)| f.is_approver(&admin))
            .collect();
        if moderatable.is_empty() {
            info!(tweet_id = %mention.id, admin = %admin, "No pending feeds this moderator can moderate");
            return Ok(());
        }

        let note = classify::extract_note(&self.config.global.bot_id, &submission.username, mention);
        for (link, feed) in moderatable {
            let transitioned = self
                .store
                .update_submission_feed_status(
                    &submission.tweet_id,
                    &link.feed_id,
                    action.resulting_status(),
                    &mention.id,
                )
                .await?;
            if !transitioned {
                debug!(tweet_id = %submission.tweet_id, feed_id = %link.feed_id, "Link already decided");
                continue;
            }
            let record = ModerationRecord {
                tweet_id: submission.tweet_id.clone(),
                feed_id: link.feed_id.clone(),
                admin_id: admin.clone(),
                action,
                note: note.clone(),
                timestamp: mention.created_at,
            };
            self.store.save_moderation_action(&record).await?;
            info!(tweet_id = %submission.tweet_id, feed_id = %link.feed_id, admin = %admin, %action, "Moderated submission");

            if action == ModerationAction::Approve {
                self.stream(feed, &submission).await;
            }
        }

        self.acknowledge(mention).await;
        Ok(())
    }

    /// Run the feed's stream output for an approved submission, if enabled.
    async fn stream(&self, feed: &FeedConfig, submission: &Submission) {
        let Some(stream) = feed.enabled_stream() else {
            return;
        };
        let content = match serde_json::to_value(submission) {
            Ok(v) => v,
            Err(e) => {
                error!(tweet_id = %submission.tweet_id, error = %e, "Failed to encode submission");
                return;
            }
        };
        if let Err(e) = self
            .processor
            .process(&content, &ProcessConfig::from_stream(&feed.id, stream))
            .await
        {
            error!(
                tweet_id = %submission.tweet_id,
                feed_id = %feed.id,
                error = %e,
                causes = e.causes.len(),
                "Failed to process approved submission"
            );
        }
    }

    async fn acknowledge(&self, mention: &Mention) {
        if let Err(e) = self.source.like_tweet(&mention.id).await {
            warn!(tweet_id = %mention.id, error = %e, "Failed to like mention");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::curation::model::{FeedSubmission, SubmissionWithFeeds};
    use crate::error::{DatabaseError, SourceError};
    use crate::pipeline::testing::{Deliveries, recording_plugin_manager};
    use crate::pipeline::{DistributionFanout, TransformPipeline};
    use crate::store::LibSqlBackend;

    #[derive(Default)]
    struct FakeSource {
        batches: StdMutex<Vec<Vec<Mention>>>,
        tweets: StdMutex<HashMap<String, Mention>>,
        users: StdMutex<HashMap<String, String>>,
        liked: StdMutex<Vec<String>>,
        lookups: StdMutex<usize>,
    }

    #[async_trait]
    impl MentionSource for FakeSource {
        async fn fetch_all_new_mentions(&self) -> std::result::Result<Vec<Mention>, SourceError> {
            let mut batches = self.batches.lock().unwrap();
            Ok(if batches.is_empty() { Vec::new() } else { batches.remove(0) })
        }

        async fn get_tweet(&self, id: &str) -> std::result::Result<Option<Mention>, SourceError> {
            Ok(self.tweets.lock().unwrap().get(id).cloned())
        }

        async fn like_tweet(&self, id: &str) -> std::result::Result<(), SourceError> {
            self.liked.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn get_user_id_by_handle(&self, handle: &str) -> std::result::Result<String, SourceError> {
            *self.lookups.lock().unwrap() += 1;
            self.users
                .lock()
                .unwrap()
                .get(handle)
                .cloned()
                .ok_or_else(|| SourceError::UserLookup {
                    handle: handle.into(),
                    reason: "unknown".into(),
                })
        }

        async fn set_last_checked_id(&self, _id: &str) -> std::result::Result<(), SourceError> {
            Ok(())
        }
    }

    /// Delegates to libsql, failing the next `failing_link_reads` calls to
    /// `get_feeds_by_submission`.
    struct FlakyStore {
        inner: LibSqlBackend,
        failing_link_reads: StdMutex<usize>,
    }

    #[async_trait]
    impl CurationStore for FlakyStore {
        async fn run_migrations(&self) -> std::result::Result<(), DatabaseError> {
            self.inner.run_migrations().await
        }
        async fn upsert_feeds(&self, feeds: &[FeedRecord]) -> std::result::Result<(), DatabaseError> {
            self.inner.upsert_feeds(feeds).await
        }
        async fn save_submission(&self, submission: &Submission) -> std::result::Result<(), DatabaseError> {
            self.inner.save_submission(submission).await
        }
        async fn get_submission(&self, tweet_id: &str) -> std::result::Result<Option<Submission>, DatabaseError> {
            self.inner.get_submission(tweet_id).await
        }
        async fn get_submission_by_curator_tweet_id(
            &self,
            curator_tweet_id: &str,
        ) -> std::result::Result<Option<Submission>, DatabaseError> {
            self.inner.get_submission_by_curator_tweet_id(curator_tweet_id).await
        }
        async fn get_all_submissions(
            &self,
            status: Option<SubmissionStatus>,
        ) -> std::result::Result<Vec<SubmissionWithFeeds>, DatabaseError> {
            self.inner.get_all_submissions(status).await
        }
        async fn save_submission_to_feed(
            &self,
            submission_id: &str,
            feed_id: &str,
            status: SubmissionStatus,
        ) -> std::result::Result<(), DatabaseError> {
            self.inner.save_submission_to_feed(submission_id, feed_id, status).await
        }
        async fn update_submission_feed_status(
            &self,
            submission_id: &str,
            feed_id: &str,
            status: SubmissionStatus,
            moderation_response_tweet_id: &str,
        ) -> std::result::Result<bool, DatabaseError> {
            self.inner
                .update_submission_feed_status(submission_id, feed_id, status, moderation_response_tweet_id)
                .await
        }
        async fn get_feeds_by_submission(
            &self,
            submission_id: &str,
        ) -> std::result::Result<Vec<SubmissionFeedLink>, DatabaseError> {
            {
                let mut failing = self.failing_link_reads.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(DatabaseError::Query("disk I/O error".into()));
                }
            }
            self.inner.get_feeds_by_submission(submission_id).await
        }
        async fn get_feed_submissions(
            &self,
            feed_id: &str,
            status: Option<SubmissionStatus>,
        ) -> std::result::Result<Vec<FeedSubmission>, DatabaseError> {
            self.inner.get_feed_submissions(feed_id, status).await
        }
        async fn save_moderation_action(&self, record: &ModerationRecord) -> std::result::Result<(), DatabaseError> {
            self.inner.save_moderation_action(record).await
        }
        async fn get_moderation_history(
            &self,
            tweet_id: &str,
        ) -> std::result::Result<Vec<ModerationRecord>, DatabaseError> {
            self.inner.get_moderation_history(tweet_id).await
        }
        async fn get_daily_count(&self, user_id: &str) -> std::result::Result<u32, DatabaseError> {
            self.inner.get_daily_count(user_id).await
        }
        async fn increment_daily_count(&self, user_id: &str) -> std::result::Result<(), DatabaseError> {
            self.inner.increment_daily_count(user_id).await
        }
        async fn get_cache_value(&self, key: &str) -> std::result::Result<Option<String>, DatabaseError> {
            self.inner.get_cache_value(key).await
        }
        async fn set_cache_value(&self, key: &str, value: &str) -> std::result::Result<(), DatabaseError> {
            self.inner.set_cache_value(key, value).await
        }
        async fn delete_cache_value(&self, key: &str) -> std::result::Result<(), DatabaseError> {
            self.inner.delete_cache_value(key).await
        }
    }

    fn tweet(id: &str, user: &str, text: &str, reply_to: Option<&str>, tags: &[&str]) -> Mention {
        serde_json::from_value(json!({
            "id": id,
            "userId": format!("uid-{user}"),
            "username": user,
            "text": text,
            "hashtags": tags,
            "inReplyToStatusId": reply_to,
        }))
        .unwrap()
    }

    fn app_config(max_daily: u32) -> AppConfig {
        AppConfig::from_json_str(
            &json!({
                "global": { "botId": "bot", "maxDailySubmissionsPerUser": max_daily,
                            "blacklist": { "twitter": ["troll"] } },
                "feeds": [
                    { "id": "grants", "name": "Grants",
                      "moderation": { "approvers": { "twitter": ["mod"] } },
                      "outputs": { "stream": { "enabled": true,
                        "distribute": [{ "plugin": "@test/record" }] } } },
                    { "id": "eth", "name": "Ethereum",
                      "moderation": { "approvers": { "twitter": ["ethmod"] } } }
                ]
            })
            .to_string(),
            |_| None,
        )
        .unwrap()
    }

    struct Harness {
        workflow: Arc<CurationWorkflow>,
        store: Arc<dyn CurationStore>,
        source: Arc<FakeSource>,
        deliveries: Deliveries,
    }

    async fn harness(max_daily: u32, source: FakeSource) -> Harness {
        let store: Arc<dyn CurationStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        harness_with_store(max_daily, source, store).await
    }

    async fn harness_with_store(
        max_daily: u32,
        source: FakeSource,
        store: Arc<dyn CurationStore>,
    ) -> Harness {
        let (manager, deliveries) = recording_plugin_manager();
        let manager = Arc::new(manager);
        let processor = Arc::new(ContentProcessor::new(
            TransformPipeline::new(Arc::clone(&manager)),
            DistributionFanout::new(manager),
        ));
        let source = Arc::new(source);
        let workflow = Arc::new(CurationWorkflow::new(
            Arc::new(app_config(max_daily)),
            Arc::clone(&store),
            Arc::clone(&source) as Arc<dyn MentionSource>,
            processor,
            WorkflowConfig::default(),
        ));
        workflow.initialize().await.unwrap();
        Harness {
            workflow,
            store,
            source,
            deliveries,
        }
    }

    fn source_with(tweets: Vec<Mention>, batches: Vec<Vec<Mention>>) -> FakeSource {
        let users = [("mod", "uid-mod"), ("ethmod", "uid-ethmod")]
            .into_iter()
            .map(|(h, id)| (h.to_string(), id.to_string()))
            .collect();
        FakeSource {
            batches: StdMutex::new(batches),
            tweets: StdMutex::new(tweets.into_iter().map(|t| (t.id.clone(), t)).collect()),
            users: StdMutex::new(users),
            ..FakeSource::default()
        }
    }

    async fn status(store: &Arc<dyn CurationStore>, feed: &str) -> Option<SubmissionStatus> {
        store
            .get_feeds_by_submission("100")
            .await
            .unwrap()
            .into_iter()
            .find(|l| l.feed_id == feed)
            .map(|l| l.status)
    }

    #[tokio::test]
    async fn submission_then_moderation() {
        let original = tweet("100", "author", "a great post", None, &[]);
        let submit = tweet("200", "alice", "!submit @bot #grants #eth", Some("100"), &["grants", "eth"]);
        let approve = tweet("300", "mod", "@bot !approve nice", Some("200"), &[]);
        let h = harness(
            5,
            source_with(
                vec![original, submit.clone()],
                vec![vec![submit], vec![approve]],
            ),
        )
        .await;

        h.workflow.check_mentions().await;
        let saved = h.store.get_submission("100").await.unwrap().unwrap();
        assert_eq!(saved.curator_username, "alice");
        assert_eq!(saved.curator_tweet_id, "200");
        assert_eq!(status(&h.store, "grants").await, Some(SubmissionStatus::Pending));
        assert_eq!(status(&h.store, "eth").await, Some(SubmissionStatus::Pending));

        h.workflow.check_mentions().await;
        assert_eq!(status(&h.store, "grants").await, Some(SubmissionStatus::Approved));
        assert_eq!(status(&h.store, "eth").await, Some(SubmissionStatus::Pending));

        let history = h.store.get_moderation_history("100").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].admin_id, "mod");
        assert_eq!(history[0].note.as_deref(), Some("!approve nice"));

        let delivered = h.deliveries.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["tweetId"], "100");
        assert_eq!(*h.source.liked.lock().unwrap(), vec!["200", "300"]);
    }

    #[tokio::test]
    async fn admin_ids_are_cached() {
        let h = harness(5, source_with(vec![], vec![])).await;
        assert_eq!(h.workflow.admin_ids().await.get("uid-mod").map(String::as_str), Some("mod"));
        assert_eq!(*h.source.lookups.lock().unwrap(), 2);

        let raw = h.store.get_cache_value(ADMIN_IDS_KEY).await.unwrap().unwrap();
        let cached: HashMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(cached.len(), 2);

        h.workflow.initialize().await.unwrap();
        assert_eq!(*h.source.lookups.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn rejects_unusable_submissions() {
        let original = tweet("100", "author", "post", None, &[]);
        let not_reply = tweet("201", "alice", "!submit @bot #grants", None, &["grants"]);
        let troll = tweet("202", "Troll", "!submit @bot #grants", Some("100"), &["grants"]);
        let no_feed = tweet("203", "alice", "!submit @bot #near", Some("100"), &["near"]);
        let missing = tweet("204", "alice", "!submit @bot #grants", Some("999"), &["grants"]);
        let h = harness(
            5,
            source_with(
                vec![original, troll.clone(), no_feed.clone(), missing.clone()],
                vec![vec![not_reply, troll, no_feed, missing]],
            ),
        )
        .await;
        h.workflow.check_mentions().await;
        assert!(h.store.get_submission("100").await.unwrap().is_none());
        assert!(h.store.get_submission("999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn approver_submission_auto_approves_once() {
        let original = tweet("100", "author", "post", None, &[]);
        let submit = tweet("200", "mod", "!submit @bot #grants", Some("100"), &["grants"]);
        let again = tweet("201", "mod", "!submit @bot #grants", Some("100"), &["grants"]);
        let h = harness(
            5,
            source_with(
                vec![original, submit.clone(), again.clone()],
                vec![vec![submit, again]],
            ),
        )
        .await;
        h.workflow.check_mentions().await;

        assert_eq!(status(&h.store, "grants").await, Some(SubmissionStatus::Approved));
        assert_eq!(h.store.get_moderation_history("100").await.unwrap().len(), 1);
        assert_eq!(h.deliveries.lock().unwrap().len(), 1);
        assert_eq!(h.store.get_daily_count("uid-mod").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn quota_drops_extra_submissions() {
        let a = tweet("100", "author", "one", None, &[]);
        let b = tweet("101", "author", "two", None, &[]);
        let s1 = tweet("200", "alice", "!submit @bot #grants", Some("100"), &["grants"]);
        let s2 = tweet("201", "alice", "!submit @bot #grants", Some("101"), &["grants"]);
        let h = harness(
            1,
            source_with(vec![a, b, s1.clone(), s2.clone()], vec![vec![s1, s2]]),
        )
        .await;
        h.workflow.check_mentions().await;
        assert!(h.store.get_submission("100").await.unwrap().is_some());
        assert!(h.store.get_submission("101").await.unwrap().is_none());
        assert_eq!(*h.source.liked.lock().unwrap(), vec!["200"]);
    }

    #[tokio::test]
    async fn reject_does_not_stream() {
        let original = tweet("100", "author", "post", None, &[]);
        let submit = tweet("200", "alice", "!submit @bot #grants", Some("100"), &["grants"]);
        let reject = tweet("300", "mod", "!reject", Some("200"), &[]);
        let late = tweet("301", "mod", "!approve", Some("200"), &[]);
        let h = harness(
            5,
            source_with(vec![original, submit.clone()], vec![vec![submit, reject, late]]),
        )
        .await;
        h.workflow.check_mentions().await;
        assert_eq!(status(&h.store, "grants").await, Some(SubmissionStatus::Rejected));
        assert_eq!(h.store.get_moderation_history("100").await.unwrap().len(), 1);
        assert!(h.deliveries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn approver_resolved_after_startup_can_moderate() {
        let original = tweet("100", "author", "post", None, &[]);
        let submit = tweet("200", "alice", "!submit @bot #grants", Some("100"), &["grants"]);
        let approve = tweet("300", "mod", "!approve", Some("200"), &[]);
        let source = source_with(vec![original, submit.clone()], vec![vec![submit], vec![approve]]);
        source.users.lock().unwrap().remove("mod");
        let h = harness(5, source).await;

        // ethmod resolved, mod not yet: nothing is cached.
        assert_eq!(h.workflow.admin_ids().await.len(), 1);
        assert!(h.store.get_cache_value(ADMIN_IDS_KEY).await.unwrap().is_none());

        h.workflow.check_mentions().await;
        h.source
            .users
            .lock()
            .unwrap()
            .insert("mod".into(), "uid-mod".into());
        h.workflow.check_mentions().await;

        assert_eq!(status(&h.store, "grants").await, Some(SubmissionStatus::Approved));
        assert_eq!(h.deliveries.lock().unwrap().len(), 1);
        let raw = h.store.get_cache_value(ADMIN_IDS_KEY).await.unwrap().unwrap();
        let cached: HashMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(cached.get("uid-mod").map(String::as_str), Some("mod"));
        assert_eq!(cached.len(), 2);
    }

    #[tokio::test]
    async fn incomplete_cached_admin_map_is_completed() {
        let source = source_with(vec![], vec![]);
        let store: Arc<dyn CurationStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store
            .set_cache_value(ADMIN_IDS_KEY, r#"{"uid-ethmod":"ethmod"}"#)
            .await
            .unwrap();
        let h = harness_with_store(5, source, store).await;

        assert_eq!(*h.source.lookups.lock().unwrap(), 1);
        assert_eq!(h.workflow.admin_ids().await.get("uid-mod").map(String::as_str), Some("mod"));
        let raw = h.store.get_cache_value(ADMIN_IDS_KEY).await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<HashMap<String, String>>(&raw).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejected_link_stays_rejected_when_approver_resubmits() {
        let original = tweet("100", "author", "post", None, &[]);
        let submit = tweet("200", "alice", "!submit @bot #grants", Some("100"), &["grants"]);
        let reject = tweet("300", "mod", "!reject", Some("200"), &[]);
        let resubmit = tweet("400", "mod", "!submit @bot #grants", Some("100"), &["grants"]);
        let h = harness(
            5,
            source_with(
                vec![original, submit.clone(), resubmit.clone()],
                vec![vec![submit, reject], vec![resubmit]],
            ),
        )
        .await;
        h.workflow.check_mentions().await;
        assert_eq!(status(&h.store, "grants").await, Some(SubmissionStatus::Rejected));

        h.workflow.check_mentions().await;
        assert_eq!(status(&h.store, "grants").await, Some(SubmissionStatus::Rejected));
        assert_eq!(h.store.get_moderation_history("100").await.unwrap().len(), 1);
        assert!(h.deliveries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_link_read_leaves_rejected_link_alone() {
        let original = tweet("100", "author", "post", None, &[]);
        let submit = tweet("200", "alice", "!submit @bot #grants", Some("100"), &["grants"]);
        let reject = tweet("300", "mod", "!reject", Some("200"), &[]);
        let resubmit = tweet("400", "mod", "!submit @bot #grants", Some("100"), &["grants"]);
        let flaky = Arc::new(FlakyStore {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            failing_link_reads: StdMutex::new(0),
        });
        let h = harness_with_store(
            5,
            source_with(
                vec![original, submit.clone(), resubmit.clone()],
                vec![vec![submit, reject], vec![resubmit]],
            ),
            Arc::clone(&flaky) as Arc<dyn CurationStore>,
        )
        .await;
        h.workflow.check_mentions().await;
        assert_eq!(status(&h.store, "grants").await, Some(SubmissionStatus::Rejected));

        *flaky.failing_link_reads.lock().unwrap() = 1;
        h.workflow.check_mentions().await;

        assert_eq!(*flaky.failing_link_reads.lock().unwrap(), 0);
        assert_eq!(status(&h.store, "grants").await, Some(SubmissionStatus::Rejected));
        assert_eq!(h.store.get_moderation_history("100").await.unwrap().len(), 1);
        assert!(h.deliveries.lock().unwrap().is_empty());
        assert!(!h.source.liked.lock().unwrap().contains(&"400".to_string()));
    }

    #[tokio::test]
    async fn start_checks_immediately_and_stop_is_idempotent() {
        let original = tweet("100", "author", "post", None, &[]);
        let submit = tweet("200", "alice", "!submit @bot #grants", Some("100"), &["grants"]);
        let h = harness(5, source_with(vec![original, submit.clone()], vec![vec![submit]])).await;

        h.workflow.start().await;
        let mut saved = false;
        for _ in 0..100 {
            if h.store.get_submission("100").await.unwrap().is_some() {
                saved = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(saved, "first check should run without waiting a full interval");

        h.workflow.stop().await;
        h.workflow.stop().await;
    }
}
