//! Curation: submissions, moderation and scheduled recaps.

pub mod classify;
pub mod model;
pub mod recap;
pub mod workflow;

pub use recap::{RecapHandle, RecapScheduler, spawn_recap_scheduler};
pub use workflow::CurationWorkflow;
