//! Mount capabilities
//!
//! The health checker talks to the operating system only through these
//! traits:
//! - `MountProbe` answers "is this path a mount point" and "can it be listed"
//! - `Mounter` attaches a remote directory with sshfs
//! - `Unmounter` detaches a stuck mount (forced, then lazy)

pub mod system;

use crate::error::Result;
use crate::server::ServerConfig;
use std::io;
use std::path::Path;

pub use system::{SshfsMounter, SystemMounts, SystemUnmounter};

/// Point-in-time view of the mount table and mount point health
pub trait MountProbe {
    /// Whether `path` is currently listed in the mount table
    fn is_mounted(&self, path: &Path) -> Result<bool>;

    /// Whether `path` exists and is a directory
    fn is_directory(&self, path: &Path) -> bool;

    /// List `path`, returning the number of entries
    fn list_dir(&self, path: &Path) -> io::Result<usize>;
}

/// Remote filesystem mount facility
pub trait Mounter {
    /// Mount `config.remote_spec()` on `config.mount_point` using `config.ssh_key`
    ///
    /// Blocks until the mount client returns; no timeout is imposed here.
    fn mount(&self, config: &ServerConfig) -> Result<()>;
}

/// Detach strategies for an unresponsive mount
pub trait Unmounter {
    /// Forced unmount (`MNT_FORCE`)
    fn force_unmount(&self, path: &Path) -> Result<()>;

    /// Lazy unmount (`MNT_DETACH`), detaching now and cleaning up when idle
    fn lazy_unmount(&self, path: &Path) -> Result<()>;
}

/// Result of probing a mount point's accessibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessibility {
    /// Mounted, a directory, and listable
    Accessible,
    /// No longer in the mount table
    NoLongerMounted,
    /// Path is missing or not a directory
    NotDirectory,
    /// Listing failed
    ListFailed(String),
}

impl Accessibility {
    /// Whether all three accessibility conditions held
    pub fn is_accessible(&self) -> bool {
        matches!(self, Accessibility::Accessible)
    }
}

impl std::fmt::Display for Accessibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Accessibility::Accessible => write!(f, "accessible"),
            Accessibility::NoLongerMounted => write!(f, "no longer mounted"),
            Accessibility::NotDirectory => write!(f, "not a directory"),
            Accessibility::ListFailed(e) => write!(f, "listing failed: {}", e),
        }
    }
}

/// Run the three-part accessibility check against a mounted path
pub fn check_access(probe: &dyn MountProbe, path: &Path) -> Result<Accessibility> {
    if !probe.is_mounted(path)? {
        return Ok(Accessibility::NoLongerMounted);
    }
    if !probe.is_directory(path) {
        return Ok(Accessibility::NotDirectory);
    }
    match probe.list_dir(path) {
        Ok(_) => Ok(Accessibility::Accessible),
        Err(e) => Ok(Accessibility::ListFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProbe {
        mounted: bool,
        directory: bool,
        listable: bool,
    }

    const HEALTHY: StaticProbe = StaticProbe {
        mounted: true,
        directory: true,
        listable: true,
    };

    impl MountProbe for StaticProbe {
        fn is_mounted(&self, _path: &Path) -> Result<bool> {
            Ok(self.mounted)
        }

        fn is_directory(&self, _path: &Path) -> bool {
            self.directory
        }

        fn list_dir(&self, _path: &Path) -> io::Result<usize> {
            if self.listable {
                Ok(0)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "Transport endpoint is not connected",
                ))
            }
        }
    }

    fn access(probe: StaticProbe) -> Accessibility {
        check_access(&probe, Path::new("/mnt/plex-media")).unwrap()
    }

    #[test]
    fn test_accessible() {
        let result = access(HEALTHY);
        assert_eq!(result, Accessibility::Accessible);
        assert!(result.is_accessible());
    }

    #[test]
    fn test_dropped_from_mount_table() {
        let result = access(StaticProbe {
            mounted: false,
            ..HEALTHY
        });
        assert_eq!(result, Accessibility::NoLongerMounted);
        assert!(!result.is_accessible());
        assert_eq!(result.to_string(), "no longer mounted");
    }

    #[test]
    fn test_not_a_directory() {
        let result = access(StaticProbe {
            directory: false,
            ..HEALTHY
        });
        assert_eq!(result, Accessibility::NotDirectory);
        assert!(!result.is_accessible());
    }

    #[test]
    fn test_listing_fails() {
        let result = access(StaticProbe {
            listable: false,
            ..HEALTHY
        });
        assert!(matches!(result, Accessibility::ListFailed(ref e) if e.contains("not connected")));
        assert!(result.to_string().starts_with("listing failed: "));
    }

    #[test]
    fn test_mount_table_error_propagates() {
        struct Broken;
        impl MountProbe for Broken {
            fn is_mounted(&self, _path: &Path) -> Result<bool> {
                Err(std::io::Error::other("mountinfo unreadable").into())
            }
            fn is_directory(&self, _path: &Path) -> bool {
                true
            }
            fn list_dir(&self, _path: &Path) -> io::Result<usize> {
                Ok(0)
            }
        }

        assert!(check_access(&Broken, Path::new("/mnt/plex-media")).is_err());
    }
}
