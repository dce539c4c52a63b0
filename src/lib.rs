//! binpatch - versioned binary distribution with delta updates
//! and atomic self-replacement

pub mod engine;

pub use engine::api::{create_router, ApiState};
pub use engine::updater::{PatchClient, UpdateVariant};
