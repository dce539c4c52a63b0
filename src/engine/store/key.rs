//! Artifact keys
//!
//! A key names exactly one stored binary. Components end up inside a file
//! name, so they are validated before any path is built from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::engine::platform::Platform;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("'{field}' must not be empty")]
    Empty { field: &'static str },
    #[error("'{field}' contains invalid characters: {value:?}")]
    InvalidCharacters { field: &'static str, value: String },
}

/// {name, version, arch, os}
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub name: String,
    pub version: String,
    pub platform: Platform,
}

impl ArtifactKey {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        platform: Platform,
    ) -> Result<Self, KeyError> {
        let name = name.into();
        let version = version.into();
        validate_name(&name)?;
        validate_version(&version)?;
        Ok(Self {
            name,
            version,
            platform,
        })
    }

    /// Same name and platform, another version
    pub fn with_version(&self, version: &str) -> Result<Self, KeyError> {
        Self::new(self.name.clone(), version, self.platform)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.platform)
    }
}

fn validate_component(field: &'static str, value: &str) -> Result<(), KeyError> {
    if value.is_empty() {
        return Err(KeyError::Empty { field });
    }
    let bad_char = value
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());
    if bad_char || value == "." || value == ".." {
        return Err(KeyError::InvalidCharacters {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Names additionally exclude `_` so the version between the separators is unambiguous.
pub fn validate_name(name: &str) -> Result<(), KeyError> {
    validate_component("name", name)?;
    if name.contains('_') || name.starts_with('.') {
        return Err(KeyError::InvalidCharacters {
            field: "name",
            value: name.to_string(),
        });
    }
    Ok(())
}

pub fn validate_version(version: &str) -> Result<(), KeyError> {
    validate_component("version", version)
}
