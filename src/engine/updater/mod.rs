//! binpatch Self-Updater
//!
//! Client side of the update protocol:
//! - Fetch a full binary, a delta, or a signed envelope
//! - Rebuild and verify the new executable in memory
//! - Swap it in atomically, rolling back on failure

pub mod apply;
pub mod client;
pub mod download;
pub mod lock;
pub mod state;

pub use apply::{ApplyError, AtomicApplier, FileOps, OsFileOps, Recovery};
pub use client::{PatchClient, UpdateError, UpdateOutcome, UpdateVariant};
pub use download::{FetchError, FetchOutcome, Fetcher};
pub use lock::{LockError, UpdateLock};
pub use state::{ApplyPhase, ApplyState};
