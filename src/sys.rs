//! Privilege checks and version information

use crate::error::{Error, Result};
use nix::unistd::geteuid;
use std::fmt;

/// Whether the process runs with root privileges
pub fn is_root() -> bool {
    geteuid().is_root()
}

/// Fail with `PermissionDenied` unless running as root
pub fn require_root(command: &str) -> Result<()> {
    if is_root() {
        Ok(())
    } else {
        Err(Error::PermissionDenied(command.to_string()))
    }
}

/// Release version (`MAJOR.MINOR.PATCH`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Version of this binary
    pub fn current() -> Result<Self> {
        Self::parse(env!("CARGO_PKG_VERSION"))
    }

    /// Parse version strings like:
    /// - `1.2.3`
    /// - `v1.2.3`
    /// - `v1.2.3-rc1` (pre-release suffix ignored)
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = bare.split(['-', '+']).next().unwrap_or(bare);

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        let number = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| Error::InvalidVersion(s.to_string()))
        };

        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let v = Version::parse("1.4.2").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 4, 2));
    }

    #[test]
    fn test_parse_tag() {
        assert_eq!(
            Version::parse("v0.3.10").unwrap(),
            Version::parse("0.3.10").unwrap()
        );
        assert_eq!(Version::parse("v2.0.0-rc1").unwrap().to_string(), "2.0.0");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Version::parse("1.2").is_err());
        assert!(Version::parse("latest").is_err());
        assert!(Version::parse("v1.x.3").is_err());
    }

    #[test]
    fn test_ordering() {
        let older = Version::parse("0.9.12").unwrap();
        let newer = Version::parse("0.10.0").unwrap();
        assert!(newer > older);
    }

    #[test]
    fn test_current() {
        assert_eq!(
            Version::current().unwrap().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }
}
