//! In-process mention source fed over HTTP.
//!
//! A platform bridge pushes mentions with `POST /api/mentions`, the messages
//! they reply to with `POST /api/tweets` and known accounts with
//! `POST /api/users`. The workflow drains the queue on each poll.
//!
//! Messages and handles learned from them are kept for a retention window
//! once they are at or below the high-water mark. Accounts registered
//! explicitly never expire.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::SourceError;
use crate::source::mention::{Mention, MentionSource, is_newer};

/// How long handled messages stay retrievable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Most recent likes remembered for `is_liked`.
const LIKED_CAPACITY: usize = 1024;

struct KnownUser {
    user_id: String,
    /// `None` for registered accounts, which are never pruned.
    seen: Option<Instant>,
}

#[derive(Default)]
struct InboxState {
    queue: VecDeque<Mention>,
    tweets: HashMap<String, (Mention, Instant)>,
    users: HashMap<String, KnownUser>,
    liked: VecDeque<String>,
    last_checked_id: Option<String>,
}

impl InboxState {
    fn remember(&mut self, tweet: &Mention) {
        let now = Instant::now();
        if tweet.has_username() {
            let user = self
                .users
                .entry(tweet.username.to_lowercase())
                .or_insert_with(|| KnownUser {
                    user_id: tweet.user_id.clone(),
                    seen: Some(now),
                });
            if user.seen.is_some() {
                user.user_id = tweet.user_id.clone();
                user.seen = Some(now);
            }
        }
        self.tweets.insert(tweet.id.clone(), (tweet.clone(), now));
    }

    /// Drop messages older than `retention` that are at or below the mark,
    /// and learned handles not seen within `retention`.
    fn prune(&mut self, retention: Duration) {
        let now = Instant::now();
        let mark = self.last_checked_id.clone();
        let before = self.tweets.len();
        self.tweets.retain(|id, (_, at)| {
            now.duration_since(*at) <= retention || is_newer(id, mark.as_deref())
        });
        self.users.retain(|_, user| match user.seen {
            Some(seen) => now.duration_since(seen) <= retention,
            None => true,
        });
        let evicted = before - self.tweets.len();
        if evicted > 0 {
            debug!(evicted, kept = self.tweets.len(), "Pruned inbox messages");
        }
    }
}

pub struct InboxSource {
    state: Mutex<InboxState>,
    retention: Duration,
}

impl Default for InboxSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InboxSource {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            state: Mutex::new(InboxState::default()),
            retention,
        }
    }

    /// Queue a mention for the next poll. It is also retrievable by id.
    pub async fn push_mention(&self, mention: Mention) {
        let mut state = self.state.lock().await;
        state.remember(&mention);
        state.queue.push_back(mention);
    }

    /// Make a message retrievable by id without queueing it.
    pub async fn register_tweet(&self, tweet: Mention) {
        self.state.lock().await.remember(&tweet);
    }

    /// Pin a handle → user id mapping.
    pub async fn register_user(&self, handle: &str, user_id: &str) {
        self.state.lock().await.users.insert(
            handle.trim_start_matches('@').to_lowercase(),
            KnownUser {
                user_id: user_id.to_string(),
                seen: None,
            },
        );
    }

    pub async fn is_liked(&self, id: &str) -> bool {
        self.state.lock().await.liked.iter().any(|l| l == id)
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Messages currently retrievable by id.
    pub async fn retained(&self) -> usize {
        self.state.lock().await.tweets.len()
    }
}

#[async_trait]
impl MentionSource for InboxSource {
    async fn fetch_all_new_mentions(&self) -> Result<Vec<Mention>, SourceError> {
        let (mut fresh, newest) = {
            let mut state = self.state.lock().await;
            state.prune(self.retention);
            let mark = state.last_checked_id.clone();
            let fresh: Vec<Mention> = state
                .queue
                .drain(..)
                .filter(|m| is_newer(&m.id, mark.as_deref()))
                .collect();
            let newest = fresh
                .iter()
                .max_by(|a, b| a.ordinal().cmp(&b.ordinal()))
                .map(|m| m.id.clone());
            (fresh, newest)
        };
        fresh.sort_by(|a, b| a.ordinal().cmp(&b.ordinal()));
        if let Some(id) = newest {
            self.set_last_checked_id(&id).await?;
        }
        Ok(fresh)
    }

    async fn get_tweet(&self, id: &str) -> Result<Option<Mention>, SourceError> {
        Ok(self
            .state
            .lock()
            .await
            .tweets
            .get(id)
            .map(|(tweet, _)| tweet.clone()))
    }

    async fn like_tweet(&self, id: &str) -> Result<(), SourceError> {
        let mut state = self.state.lock().await;
        if !state.liked.iter().any(|l| l == id) {
            if state.liked.len() == LIKED_CAPACITY {
                state.liked.pop_front();
            }
            state.liked.push_back(id.to_string());
        }
        debug!(tweet_id = %id, "Liked");
        Ok(())
    }

    async fn get_user_id_by_handle(&self, handle: &str) -> Result<String, SourceError> {
        self.state
            .lock()
            .await
            .users
            .get(&handle.trim_start_matches('@').to_lowercase())
            .map(|user| user.user_id.clone())
            .ok_or_else(|| SourceError::UserLookup {
                handle: handle.to_string(),
                reason: "unknown handle".into(),
            })
    }

    async fn set_last_checked_id(&self, id: &str) -> Result<(), SourceError> {
        self.state.lock().await.last_checked_id = Some(id.to_string());
        Ok(())
    }
}

/// Shared state for inbox routes.
#[derive(Clone)]
pub struct InboxRouteState {
    pub inbox: Arc<InboxSource>,
}

/// Build the inbox routes.
pub fn inbox_routes(state: InboxRouteState) -> Router {
    Router::new()
        .route("/api/mentions", post(push_mention))
        .route("/api/tweets", post(register_tweet))
        .route("/api/users", post(register_user))
        .with_state(state)
}

/// POST /api/mentions
async fn push_mention(
    State(state): State<InboxRouteState>,
    Json(mention): Json<Mention>,
) -> impl IntoResponse {
    info!(tweet_id = %mention.id, user = %mention.username, "Mention received");
    let id = mention.id.clone();
    state.inbox.push_mention(mention).await;
    (StatusCode::ACCEPTED, Json(json!({ "queued": id })))
}

/// POST /api/tweets
async fn register_tweet(
    State(state): State<InboxRouteState>,
    Json(tweet): Json<Mention>,
) -> impl IntoResponse {
    let id = tweet.id.clone();
    state.inbox.register_tweet(tweet).await;
    (StatusCode::CREATED, Json(json!({ "registered": id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRegistration {
    handle: String,
    user_id: String,
}

/// POST /api/users
async fn register_user(
    State(state): State<InboxRouteState>,
    Json(user): Json<UserRegistration>,
) -> impl IntoResponse {
    if user.handle.trim().is_empty() || user.user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "handle and userId are required" })),
        );
    }
    info!(handle = %user.handle, user_id = %user.user_id, "User registered");
    state.inbox.register_user(&user.handle, &user.user_id).await;
    (StatusCode::CREATED, Json(json!({ "registered": user.handle })))
}
