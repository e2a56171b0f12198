//! Scheduled recaps: batch a feed's newly approved submissions on a cron
//! schedule and send them through the recap output.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, RecapConfig};
use crate::curation::model::SubmissionStatus;
use crate::error::Result;
use crate::pipeline::{ContentProcessor, ProcessConfig};
use crate::store::CurationStore;
use crate::store::retry::with_default;

/// Parse a 5- or 6-field cron expression. Five fields get a zero seconds
/// column prepended.
pub fn parse_schedule(expr: &str) -> std::result::Result<Schedule, String> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| format!("invalid cron: {e}"))
}

fn recap_key(feed_id: &str) -> String {
    format!("recap_last:{feed_id}")
}

pub struct RecapScheduler {
    config: Arc<AppConfig>,
    store: Arc<dyn CurationStore>,
    processor: Arc<ContentProcessor>,
}

impl RecapScheduler {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn CurationStore>,
        processor: Arc<ContentProcessor>,
    ) -> Self {
        Self {
            config,
            store,
            processor,
        }
    }

    /// Send one recap for `feed_id`. Returns how many submissions it covered.
    ///
    /// The last-recap mark only advances when delivery succeeds, so a failed
    /// recap is retried with the same items on the next firing.
    pub async fn run_recap(&self, feed_id: &str, recap: &RecapConfig) -> Result<usize> {
        let since = with_default(
            "get_cache_value",
            None,
            self.store.get_cache_value(&recap_key(feed_id)),
        )
        .await
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|t| t.with_timezone(&Utc));

        let approved = with_default(
            "get_feed_submissions",
            Vec::new(),
            self.store
                .get_feed_submissions(feed_id, Some(SubmissionStatus::Approved)),
        )
        .await;
        let fresh: Vec<_> = approved
            .into_iter()
            .filter(|item| since.is_none_or(|since| item.link.updated_at > since))
            .collect();
        let Some(newest) = fresh.iter().map(|item| item.link.updated_at).max() else {
            debug!(feed_id = %feed_id, "Nothing to recap");
            return Ok(0);
        };

        let items: Vec<Value> = fresh
            .iter()
            .filter_map(|item| match serde_json::to_value(&item.submission) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(tweet_id = %item.submission.tweet_id, error = %e, "Skipping unencodable submission");
                    None
                }
            })
            .collect();

        self.processor
            .process_batch(&items, &ProcessConfig::from_recap(feed_id, recap))
            .await?;
        self.store
            .set_cache_value(&recap_key(feed_id), &newest.to_rfc3339())
            .await?;
        info!(feed_id = %feed_id, count = items.len(), "Recap sent");
        Ok(items.len())
    }
}

/// Handle to the running recap tasks.
pub struct RecapHandle {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RecapHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub async fn stop(self) {
        // Receivers only go away when every task has already exited.
        let _ = self.stop_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Recap task failed");
            }
        }
    }
}

/// Spawn one task per feed with an enabled recap output.
pub fn spawn_recap_scheduler(scheduler: Arc<RecapScheduler>) -> RecapHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for feed in &scheduler.config.feeds {
        let Some(recap) = feed.enabled_recap() else {
            continue;
        };
        let schedule = match parse_schedule(&recap.schedule) {
            Ok(s) => s,
            Err(e) => {
                error!(feed_id = %feed.id, error = %e, "Recap disabled: bad schedule");
                continue;
            }
        };

        let feed_id = feed.id.clone();
        let recap = recap.clone();
        let scheduler = Arc::clone(&scheduler);
        let mut stop_rx = stop_rx.clone();
        tasks.push(tokio::spawn(async move {
            info!(feed_id = %feed_id, schedule = %recap.schedule, "Recap scheduler started");
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    warn!(feed_id = %feed_id, "Recap schedule has no future firings");
                    return;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                if *stop_rx.borrow() {
                    info!(feed_id = %feed_id, "Recap scheduler stopped");
                    return;
                }
                if let Err(e) = scheduler.run_recap(&feed_id, &recap).await {
                    error!(feed_id = %feed_id, error = %e, "Recap failed");
                }
            }
        }));
    }

    RecapHandle { stop_tx, tasks }
}
