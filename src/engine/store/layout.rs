//! Filesystem layout of the artifact store
//!
//! `{base_dir}/{name}_{version}_{arch}{os}` with `.signature` and `.sha256`
//! sidecars. Callers go through [`KeyLayout`] so the encoding can change
//! without touching them.

use std::path::{Path, PathBuf};

use super::key::ArtifactKey;
use crate::engine::platform::Platform;

pub const SIGNATURE_SUFFIX: &str = ".signature";
pub const DIGEST_SUFFIX: &str = ".sha256";

/// Maps keys to paths and file names back to versions
pub trait KeyLayout: Send + Sync {
    fn artifact_path(&self, base_dir: &Path, key: &ArtifactKey) -> PathBuf;

    /// Version encoded in `file_name`, if it belongs to (name, platform)
    fn version_from_file_name(
        &self,
        name: &str,
        platform: &Platform,
        file_name: &str,
    ) -> Option<String>;
}

/// One flat directory, metadata embedded in the file name
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatFileLayout;

impl FlatFileLayout {
    pub fn file_name(key: &ArtifactKey) -> String {
        format!("{}_{}_{}", key.name, key.version, key.platform.suffix())
    }
}

impl KeyLayout for FlatFileLayout {
    fn artifact_path(&self, base_dir: &Path, key: &ArtifactKey) -> PathBuf {
        base_dir.join(Self::file_name(key))
    }

    fn version_from_file_name(
        &self,
        name: &str,
        platform: &Platform,
        file_name: &str,
    ) -> Option<String> {
        let suffix = format!("_{}", platform.suffix());
        let version = file_name
            .strip_prefix(name)?
            .strip_prefix('_')?
            .strip_suffix(suffix.as_str())?;
        if version.is_empty() {
            return None;
        }
        Some(version.to_string())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

pub fn signature_path(artifact: &Path) -> PathBuf {
    with_suffix(artifact, SIGNATURE_SUFFIX)
}

pub fn digest_path(artifact: &Path) -> PathBuf {
    with_suffix(artifact, DIGEST_SUFFIX)
}
