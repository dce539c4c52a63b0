//! Version Resolver
//!
//! Picks the latest stored version for (name, platform). Versions compare
//! byte-wise, so "v9" sorts after "v10".

use tracing::{debug, warn};

use crate::engine::platform::Platform;
use crate::engine::store::ArtifactStore;

#[derive(Clone)]
pub struct VersionResolver {
    store: ArtifactStore,
}

impl VersionResolver {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// Latest version, floored at `client_version`.
    ///
    /// Returning `client_version` means nothing newer is stored. If the
    /// store cannot be listed the client version comes back unchanged.
    pub fn resolve(&self, name: &str, platform: &Platform, client_version: &str) -> String {
        let versions = match self.store.list_versions(name, platform) {
            Ok(versions) => versions,
            Err(e) => {
                warn!(
                    "Failed to list {} for {}: {}",
                    self.store.base_dir().display(),
                    name,
                    e
                );
                return client_version.to_string();
            }
        };

        let latest = versions
            .into_iter()
            .filter(|v| v.as_bytes() > client_version.as_bytes())
            .max()
            .unwrap_or_else(|| client_version.to_string());

        debug!(
            "Resolved {} ({}) from {} to {}",
            name, platform, client_version, latest
        );
        latest
    }
}
