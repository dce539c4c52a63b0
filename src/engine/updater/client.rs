//! Patch Client
//!
//! Fetch, rebuild, verify, then swap. Every failure before the swap leaves
//! the target untouched.

use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::apply::{ApplyError, AtomicApplier, FileOps, OsFileOps, Recovery};
use super::download::{FetchError, FetchOutcome, Fetcher};
use super::lock::{LockError, UpdateLock};
use super::state::ApplyState;
use crate::engine::api::SignedUpdateEnvelope;
use crate::engine::api::UpdateCapabilities;
use crate::engine::config::ClientConfig;
use crate::engine::diff::{self, DiffError};
use crate::engine::platform::Platform;
use crate::engine::verify::{PublicKey, UpdateVerifier, VerifyError};

/// The four update requests a client can make
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateVariant {
    Full,
    Diff,
    SignedFull,
    SignedDiff,
}

impl UpdateVariant {
    pub fn capabilities(&self) -> UpdateCapabilities {
        match self {
            UpdateVariant::Full => UpdateCapabilities::FULL,
            UpdateVariant::Diff => UpdateCapabilities::DIFF,
            UpdateVariant::SignedFull => UpdateCapabilities::SIGNED_FULL,
            UpdateVariant::SignedDiff => UpdateCapabilities::SIGNED_DIFF,
        }
    }

    pub fn route(&self) -> &'static str {
        self.capabilities().route_prefix()
    }

    pub fn is_signed(&self) -> bool {
        self.capabilities().include_signature
    }

    pub fn is_diff(&self) -> bool {
        self.capabilities().include_diff
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Server answered 304; nothing changed
    AlreadyCurrent,
    Updated { bytes: usize },
}

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Signed updates need a public key")]
    MissingPublicKey,
    #[error("This build has no known architecture/OS name")]
    UnknownPlatform,
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Malformed update response: {0}")]
    Malformed(String),
    #[error("Failed to read current executable: {0}")]
    ReadTarget(#[source] std::io::Error),
    #[error("Failed to apply patch: {0}")]
    DiffApply(#[from] DiffError),
    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl UpdateError {
    /// The target may be missing; the backup has to be restored by hand
    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, UpdateError::Apply(ApplyError::RollbackFailure { .. }))
    }
}

pub struct PatchClient<F: FileOps = OsFileOps> {
    config: ClientConfig,
    platform: Platform,
    fetcher: Fetcher,
    applier: AtomicApplier<F>,
    verifier: Option<UpdateVerifier>,
}

impl PatchClient<OsFileOps> {
    /// Client for the platform this binary was built for
    pub fn new(config: ClientConfig) -> Result<Self, UpdateError> {
        let platform = Platform::current().ok_or(UpdateError::UnknownPlatform)?;
        let applier = AtomicApplier::new(config.keep_backup);
        Self::with_applier(config, platform, applier)
    }
}

impl<F: FileOps> PatchClient<F> {
    pub fn with_applier(
        config: ClientConfig,
        platform: Platform,
        applier: AtomicApplier<F>,
    ) -> Result<Self, UpdateError> {
        let fetcher = Fetcher::new(&config.server_url, config.timeout)?;
        Ok(Self {
            config,
            platform,
            fetcher,
            applier,
            verifier: None,
        })
    }

    pub fn with_public_key(mut self, key: impl Into<PublicKey>) -> Self {
        self.verifier = Some(UpdateVerifier::new(key));
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    #[instrument(skip(self), fields(name = %self.config.name, version = %self.config.current_version))]
    pub async fn run(&self, variant: UpdateVariant) -> Result<UpdateOutcome, UpdateError> {
        let verifier = match (variant.is_signed(), &self.verifier) {
            (true, None) => return Err(UpdateError::MissingPublicKey),
            (true, Some(v)) => Some(v),
            (false, _) => None,
        };

        let target = &self.config.target;
        let _lock = UpdateLock::acquire(target)?;
        if self.applier.recover(target)? == Recovery::RestoredBackup {
            warn!("Restored {} from an interrupted update", target.display());
        }

        let mut state = ApplyState::new(target);
        state.start_fetching();
        let started = Instant::now();
        let body = match self
            .fetcher
            .fetch(
                variant.route(),
                &self.config.name,
                &self.config.current_version,
                &self.platform,
            )
            .await?
        {
            FetchOutcome::NotModified => {
                state.commit();
                info!("{} {} is up to date", self.config.name, self.config.current_version);
                return Ok(UpdateOutcome::AlreadyCurrent);
            }
            FetchOutcome::Body(body) => body,
        };
        debug!("Fetched {} bytes in {:?}", body.len(), started.elapsed());

        let (payload, signed) = if variant.is_signed() {
            let envelope: SignedUpdateEnvelope = serde_json::from_slice(&body)
                .map_err(|e| UpdateError::Malformed(e.to_string()))?;
            (envelope.patch, Some((envelope.sha256, envelope.signature)))
        } else {
            (body, None)
        };

        let content = if variant.is_diff() {
            let current = tokio::fs::read(target)
                .await
                .map_err(UpdateError::ReadTarget)?;
            tokio::task::spawn_blocking(move || diff::patch(&current, &payload))
                .await
                .map_err(|e| UpdateError::Malformed(e.to_string()))??
        } else {
            payload
        };

        if let (Some(verifier), Some((digest, signature))) = (verifier, signed) {
            state.start_verifying();
            verifier.verify_bytes(&content, &digest, &signature)?;
            debug!("Verified sha256 {}", digest);
        }

        self.applier.apply(&mut state, &content)?;
        info!(
            "Updated {} ({} bytes, {:?})",
            target.display(),
            content.len(),
            state.phase
        );
        Ok(UpdateOutcome::Updated {
            bytes: content.len(),
        })
    }
}
