//! Filesystem-backed artifact repository
//!
//! Read paths never mutate the directory. The upload path is write-once: the
//! binary only appears under its final name once complete, and publishing
//! refuses to replace an existing file, so two racing uploads for one key
//! cannot both succeed.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::key::{ArtifactKey, KeyError};
use super::layout::{digest_path, signature_path, FlatFileLayout, KeyLayout};
use crate::engine::platform::Platform;
use crate::engine::verify::{sha256_hex, SignatureType};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Binary not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} already exists", path.display())]
    Conflict { path: PathBuf },
    #[error("Digest sidecar {} does not match artifact (sidecar {expected}, content {actual})", path.display())]
    SidecarMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
}

impl StoreError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Artifact bytes plus both sidecars, digest already checked against content
#[derive(Debug, Clone)]
pub struct SignedArtifact {
    pub data: Vec<u8>,
    pub digest: String,
    pub signature: Vec<u8>,
}

/// Sidecars of an artifact, read without the artifact itself
#[derive(Debug, Clone)]
pub struct Sidecars {
    pub digest: String,
    pub signature: Vec<u8>,
}

/// Upload request as accepted by the store
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub key: ArtifactKey,
    pub data: Vec<u8>,
    pub signature: Option<Vec<u8>>,
    pub signature_type: Option<String>,
}

/// Outcome of a successful upload
#[derive(Debug, Clone)]
pub struct SavedArtifact {
    pub path: PathBuf,
    pub digest: String,
    pub signed: bool,
}

#[derive(Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
    layout: Arc<dyn KeyLayout>,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_layout(base_dir, Arc::new(FlatFileLayout))
    }

    pub fn with_layout(base_dir: impl Into<PathBuf>, layout: Arc<dyn KeyLayout>) -> Self {
        Self {
            base_dir: base_dir.into(),
            layout,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn artifact_path(&self, key: &ArtifactKey) -> PathBuf {
        self.layout.artifact_path(&self.base_dir, key)
    }

    /// Startup dependency check: the store root must be an existing directory
    pub fn check_ready(&self) -> bool {
        self.base_dir.is_dir()
    }

    /// All stored versions for (name, platform), in directory order
    pub fn list_versions(&self, name: &str, platform: &Platform) -> io::Result<Vec<String>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(version) = self.layout.version_from_file_name(name, platform, file_name) {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn read_artifact(&self, key: &ArtifactKey) -> Result<Vec<u8>, StoreError> {
        let path = self.artifact_path(key);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::from_io(&path, e))?;
        debug!("Read {} bytes from {}", data.len(), path.display());
        Ok(data)
    }

    /// Open the artifact for streaming; returns the file and its length
    pub async fn open_artifact(
        &self,
        key: &ArtifactKey,
    ) -> Result<(tokio::fs::File, u64), StoreError> {
        let path = self.artifact_path(key);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StoreError::from_io(&path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| StoreError::from_io(&path, e))?;
        if !metadata.is_file() {
            return Err(StoreError::Io {
                path,
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }
        Ok((file, metadata.len()))
    }

    pub async fn read_sidecars(&self, key: &ArtifactKey) -> Result<Sidecars, StoreError> {
        let path = self.artifact_path(key);
        let digest_file = digest_path(&path);
        let signature_file = signature_path(&path);

        let digest = tokio::fs::read_to_string(&digest_file)
            .await
            .map_err(|e| StoreError::from_io(&digest_file, e))?;
        let signature = tokio::fs::read(&signature_file)
            .await
            .map_err(|e| StoreError::from_io(&signature_file, e))?;

        Ok(Sidecars {
            digest: digest.trim().to_string(),
            signature,
        })
    }

    /// Artifact with both sidecars; refuses to serve when the digest sidecar is stale
    #[instrument(skip(self), fields(key = %key))]
    pub async fn read_signed(&self, key: &ArtifactKey) -> Result<SignedArtifact, StoreError> {
        let data = self.read_artifact(key).await?;
        let sidecars = self.read_sidecars(key).await?;
        let actual = sha256_hex(&data);
        if !actual.eq_ignore_ascii_case(&sidecars.digest) {
            return Err(StoreError::SidecarMismatch {
                path: digest_path(&self.artifact_path(key)),
                expected: sidecars.digest,
                actual,
            });
        }
        Ok(SignedArtifact {
            data,
            digest: sidecars.digest,
            signature: sidecars.signature,
        })
    }

    /// Write-once upload.
    ///
    /// The binary is staged in a hidden temp file under `base_dir`, synced,
    /// then published with a no-clobber rename, so readers only ever see a
    /// complete file and two racing uploads cannot both win. Sidecars follow;
    /// if one cannot be written the binary is unpublished again.
    #[instrument(skip(self, upload), fields(key = %upload.key, bytes = upload.data.len()))]
    pub fn save_upload(&self, upload: &NewArtifact) -> Result<SavedArtifact, StoreError> {
        let path = self.artifact_path(&upload.key);
        if path.exists() {
            warn!("Refusing to overwrite {}", path.display());
            return Err(StoreError::Conflict { path });
        }

        let staged = stage(&self.base_dir, &upload.data).map_err(|source| StoreError::Io {
            path: self.base_dir.clone(),
            source,
        })?;
        if let Err(e) = staged.persist_noclobber(&path) {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                warn!("Lost upload race for {}", path.display());
                return Err(StoreError::Conflict { path });
            }
            return Err(StoreError::Io {
                path,
                source: e.error,
            });
        }

        match self.write_sidecars(&path, upload) {
            Ok(saved) => Ok(saved),
            Err(e) => {
                warn!("Unpublishing {} after sidecar failure", path.display());
                let _ = fs::remove_file(digest_path(&path));
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Digest sidecar always, signature sidecar only for a recognized type
    fn write_sidecars(&self, path: &Path, upload: &NewArtifact) -> Result<SavedArtifact, StoreError> {
        let digest = sha256_hex(&upload.data);
        let digest_file = digest_path(path);
        write_sidecar(&digest_file, digest.as_bytes())
            .map_err(|e| StoreError::from_io(&digest_file, e))?;
        info!("Wrote sha256 {} for {}", digest, path.display());

        let signature_file = signature_path(path);
        let signature = upload
            .signature
            .as_deref()
            .filter(|s| !s.is_empty())
            .filter(|_| is_recognized(upload.signature_type.as_deref()));

        let signed = match signature {
            Some(signature) => {
                write_sidecar(&signature_file, signature)
                    .map_err(|e| StoreError::from_io(&signature_file, e))?;
                true
            }
            None => {
                if upload.signature.is_some() {
                    warn!(
                        "Ignoring signature with unrecognized type {:?}, storing unsigned",
                        upload.signature_type
                    );
                }
                // a leftover sidecar from an earlier failed upload must not make this one look signed
                match fs::remove_file(&signature_file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::from_io(&signature_file, e)),
                }
                false
            }
        };

        Ok(SavedArtifact {
            path: path.to_path_buf(),
            digest,
            signed,
        })
    }
}

fn is_recognized(signature_type: Option<&str>) -> bool {
    signature_type
        .map(|t| t.parse::<SignatureType>().is_ok())
        .unwrap_or(false)
}

/// Hidden, synced, executable temp file holding `data`
fn stage(dir: &Path, data: &[u8]) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile_in(dir)?;
    file.write_all(data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(0o755))?;
    }
    file.as_file().sync_all()?;
    Ok(file)
}

fn write_sidecar(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::Builder::new()
        .prefix(".sidecar-")
        .tempfile_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
