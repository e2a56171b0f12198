//! Mention classification and note extraction.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::FeedConfig;
use crate::curation::model::ModerationAction;
use crate::source::Mention;

const SUBMIT_MARKER: &str = "!submit";
const APPROVE_MARKER: &str = "!approve";
const REJECT_MARKER: &str = "!reject";

static SUBMIT_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)!submit\s+@\w+").unwrap());
static HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\w+").unwrap());

/// What a mention asks the bot to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionKind {
    Submission,
    Moderation(ModerationAction),
}

/// Classify a mention. A submit marker wins over moderation markers, and
/// approve wins over reject.
pub fn classify(text: &str) -> Option<MentionKind> {
    if text.to_lowercase().contains(SUBMIT_MARKER) {
        return Some(MentionKind::Submission);
    }
    moderation_action(text).map(MentionKind::Moderation)
}

pub fn moderation_action(text: &str) -> Option<ModerationAction> {
    let lower = text.to_lowercase();
    if lower.contains(APPROVE_MARKER) {
        Some(ModerationAction::Approve)
    } else if lower.contains(REJECT_MARKER) {
        Some(ModerationAction::Reject)
    } else {
        None
    }
}

/// Configured feeds named by the mention's hashtags, in hashtag order.
pub fn target_feeds<'a>(hashtags: &[String], feeds: &'a [FeedConfig]) -> Vec<&'a FeedConfig> {
    let mut matched: Vec<&FeedConfig> = Vec::new();
    for tag in hashtags {
        let tag = tag.trim_start_matches('#');
        if let Some(feed) = feeds.iter().find(|f| f.id.eq_ignore_ascii_case(tag))
            && !matched.iter().any(|m| m.id == feed.id)
        {
            matched.push(feed);
        }
    }
    matched
}

/// Curator note for a new submission: the command, the author's handle and
/// hashtags removed.
pub fn extract_description(author: &str, mention: &Mention) -> Option<String> {
    let text = SUBMIT_COMMAND.replace(&mention.text, "");
    let text = remove_handle(&text, author);
    non_empty(HASHTAG.replace_all(&text, "").trim())
}

/// Moderator note: hashtags, the bot handle and the author's handle removed.
pub fn extract_note(bot: &str, author: &str, mention: &Mention) -> Option<String> {
    let text = HASHTAG.replace_all(&mention.text, "");
    let text = remove_handle(&text, bot);
    let text = remove_handle(&text, author);
    non_empty(text.trim())
}

/// Remove the first `@handle`, ignoring ASCII case.
fn remove_handle(text: &str, handle: &str) -> String {
    if handle.is_empty() {
        return text.to_string();
    }
    let needle = format!("@{}", handle.to_ascii_lowercase());
    match text.to_ascii_lowercase().find(&needle) {
        Some(start) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..start]);
            out.push_str(&text[start + needle.len()..]);
            out
        }
        None => text.to_string(),
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
