// binpatch Engine - Core module structure
pub mod api;
pub mod cli;
pub mod config;
pub mod diff;
pub mod logging;
pub mod platform;
pub mod resolver;
pub mod store;
pub mod updater;
pub mod verify;

pub use config::{ClientConfig, ServerConfig};
pub use resolver::VersionResolver;
pub use store::ArtifactStore;
