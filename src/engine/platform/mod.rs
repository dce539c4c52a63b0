//! Platform Identification
//!
//! Architecture and OS names as they appear on the wire and in artifact
//! filenames, plus the server-side allow-list of supported combinations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// CPU architecture of a stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Arch {
    #[serde(rename = "amd64")]
    Amd64,
    #[serde(rename = "arm64")]
    Arm64,
    #[serde(rename = "386")]
    I386,
    #[serde(rename = "arm")]
    Arm,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::I386 => "386",
            Arch::Arm => "arm",
        }
    }

    /// Architecture of the running build, if it has a wire name
    pub fn current() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Arch::Amd64),
            "aarch64" => Some(Arch::Arm64),
            "x86" => Some(Arch::I386),
            "arm" => Some(Arch::Arm),
            _ => None,
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amd64" => Ok(Arch::Amd64),
            "arm64" => Ok(Arch::Arm64),
            "386" => Ok(Arch::I386),
            "arm" => Ok(Arch::Arm),
            _ => Err(format!("Unknown architecture: {}", s)),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system of a stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Darwin,
    Windows,
    Freebsd,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
            Os::Freebsd => "freebsd",
        }
    }

    /// Operating system of the running build, if it has a wire name
    pub fn current() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(Os::Linux),
            "macos" => Some(Os::Darwin),
            "windows" => Some(Os::Windows),
            "freebsd" => Some(Os::Freebsd),
            _ => None,
        }
    }
}

impl FromStr for Os {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(Os::Linux),
            "darwin" => Ok(Os::Darwin),
            "windows" => Ok(Os::Windows),
            "freebsd" => Ok(Os::Freebsd),
            _ => Err(format!("Unknown operating system: {}", s)),
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An (arch, os) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub arch: Arch,
    pub os: Os,
}

impl Platform {
    pub fn new(arch: Arch, os: Os) -> Self {
        Self { arch, os }
    }

    /// Detect the platform this binary was built for
    pub fn current() -> Option<Self> {
        Some(Self::new(Arch::current()?, Os::current()?))
    }

    /// Parse the two wire strings; `None` when either is unknown
    pub fn parse(arch: &str, os: &str) -> Option<Self> {
        Some(Self::new(arch.parse().ok()?, os.parse().ok()?))
    }

    /// Filename suffix, e.g. `amd64linux`
    pub fn suffix(&self) -> String {
        format!("{}{}", self.arch, self.os)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.arch, self.os)
    }
}

/// Server-maintained allow-list of platform combinations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformSet(BTreeSet<Platform>);

impl PlatformSet {
    pub fn new(platforms: impl IntoIterator<Item = Platform>) -> Self {
        Self(platforms.into_iter().collect())
    }

    pub fn contains(&self, platform: &Platform) -> bool {
        self.0.contains(platform)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Platform> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for PlatformSet {
    fn default() -> Self {
        Self::new([
            Platform::new(Arch::Amd64, Os::Linux),
            Platform::new(Arch::Amd64, Os::Darwin),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wire_names() {
        assert_eq!(
            Platform::parse("amd64", "linux"),
            Some(Platform::new(Arch::Amd64, Os::Linux))
        );
        assert_eq!(Platform::parse("386", "windows").unwrap().arch, Arch::I386);
        assert!(Platform::parse("x86_64", "linux").is_none());
        assert!(Platform::parse("amd64", "macos").is_none());
    }

    #[test]
    fn test_suffix() {
        let platform = Platform::new(Arch::Amd64, Os::Darwin);
        assert_eq!(platform.suffix(), "amd64darwin");
        assert_eq!(platform.to_string(), "amd64/darwin");
    }

    #[test]
    fn test_default_allow_list() {
        let set = PlatformSet::default();
        assert!(set.contains(&Platform::new(Arch::Amd64, Os::Linux)));
        assert!(set.contains(&Platform::new(Arch::Amd64, Os::Darwin)));
        assert!(!set.contains(&Platform::new(Arch::Arm64, Os::Linux)));
    }

    #[test]
    fn test_platform_set_serde() {
        let json = r#"[{"arch":"arm64","os":"darwin"}]"#;
        let set: PlatformSet = serde_json::from_str(json).unwrap();
        assert!(set.contains(&Platform::new(Arch::Arm64, Os::Darwin)));
        assert_eq!(set.iter().count(), 1);
    }
}
