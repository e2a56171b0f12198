//! Curate Bot: social-media content curation with pluggable transforms
//! and distributors.

pub mod config;
pub mod curation;
pub mod error;
pub mod pipeline;
pub mod plugins;
pub mod sanitize;
pub mod source;
pub mod store;
