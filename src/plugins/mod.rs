//! Plugin host: capability traits, code resolution and the lifecycle manager.

pub mod builtin;
pub mod key;
pub mod manager;
pub mod plugin;
pub mod resolver;
pub mod routes;

pub use manager::PluginManager;
pub use plugin::*;
pub use resolver::{CodeResolver, RemoteConfig, StaticResolver};
