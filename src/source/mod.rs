//! Mention sources: where submissions and moderation actions come from.

pub mod inbox;
pub mod mention;
pub mod watermark;

pub use inbox::{InboxRouteState, InboxSource, inbox_routes};
pub use mention::{Mention, MentionId, MentionSource};
pub use watermark::{MentionSearch, WatermarkedSource};
