//! Artifact Store
//!
//! Versioned binaries on the local filesystem, one file per
//! (name, version, arch, os) with `.sha256` and `.signature` sidecars.

pub mod artifact_store;
pub mod key;
pub mod layout;

pub use artifact_store::{
    ArtifactStore, NewArtifact, SavedArtifact, Sidecars, SignedArtifact, StoreError,
};
pub use key::{validate_name, validate_version, ArtifactKey, KeyError};
pub use layout::{digest_path, signature_path, FlatFileLayout, KeyLayout};
