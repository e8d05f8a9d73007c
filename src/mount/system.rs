//! Operating system implementations of the mount capabilities

use crate::error::{Error, Result};
use crate::manifest::MountSettings;
use crate::mount::{MountProbe, Mounter, Unmounter};
use crate::server::ServerConfig;
use nix::mount::{MntFlags, umount2};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Kernel mount table for the current mount namespace
const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mount table and directory access backed by procfs
#[derive(Debug, Clone)]
pub struct SystemMounts {
    mountinfo: PathBuf,
}

impl Default for SystemMounts {
    fn default() -> Self {
        Self {
            mountinfo: PathBuf::from(MOUNTINFO),
        }
    }
}

impl SystemMounts {
    /// Read the mount table from a different file
    #[cfg(test)]
    pub fn with_mountinfo(path: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo: path.into(),
        }
    }

    /// All mount points currently listed
    pub fn mount_points(&self) -> Result<Vec<PathBuf>> {
        let content = fs::read_to_string(&self.mountinfo).map_err(|e| Error::CommandFailed {
            command: format!("read {}", self.mountinfo.display()),
            message: e.to_string(),
        })?;
        Ok(parse_mountinfo(&content))
    }
}

impl MountProbe for SystemMounts {
    fn is_mounted(&self, path: &Path) -> Result<bool> {
        Ok(self.mount_points()?.iter().any(|p| p.as_path() == path))
    }

    fn is_directory(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, path: &Path) -> io::Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(path)? {
            entry?;
            count += 1;
        }
        Ok(count)
    }
}

/// Extract mount points (field 5) from `/proc/<pid>/mountinfo` content
pub fn parse_mountinfo(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

/// Decode the `\040`-style escapes the kernel uses for whitespace and backslashes
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mounts with the external `sshfs` client
#[derive(Debug, Clone)]
pub struct SshfsMounter {
    /// Client binary
    binary: String,
    /// Extra `-o` options
    options: Vec<String>,
    /// Add `allow_other`
    allow_other: bool,
}

impl SshfsMounter {
    /// Create a mounter from settings
    pub fn from_settings(settings: &MountSettings) -> Self {
        Self {
            binary: settings.sshfs.clone(),
            options: settings.options.clone(),
            allow_other: settings.allow_other,
        }
    }

    /// Arguments passed to the client for `config`
    pub fn args(&self, config: &ServerConfig) -> Vec<String> {
        let mut options = vec![format!("IdentityFile={}", config.ssh_key.display())];
        if self.allow_other {
            options.push("allow_other".to_string());
        }
        options.extend(self.options.iter().cloned());

        vec![
            config.remote_spec(),
            config.mount_point.display().to_string(),
            "-o".to_string(),
            options.join(","),
        ]
    }
}

impl Mounter for SshfsMounter {
    fn mount(&self, config: &ServerConfig) -> Result<()> {
        let args = self.args(config);
        tracing::debug!(binary = %self.binary, ?args, "running mount client");

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: self.binary.clone(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                match output.status.code() {
                    Some(code) => format!("exited with status {}", code),
                    None => "terminated by signal".to_string(),
                }
            } else {
                stderr
            };
            Err(Error::CommandFailed {
                command: self.binary.clone(),
                message,
            })
        }
    }
}

/// Unmounts through `umount2(2)`
#[derive(Debug, Clone, Default)]
pub struct SystemUnmounter;

impl SystemUnmounter {
    fn umount(path: &Path, flags: MntFlags, label: &str) -> Result<()> {
        umount2(path, flags).map_err(|errno| Error::CommandFailed {
            command: format!("umount2({}, {})", path.display(), label),
            message: errno.desc().to_string(),
        })
    }
}

impl Unmounter for SystemUnmounter {
    fn force_unmount(&self, path: &Path) -> Result<()> {
        Self::umount(path, MntFlags::MNT_FORCE, "MNT_FORCE")
    }

    fn lazy_unmount(&self, path: &Path) -> Result<()> {
        Self::umount(path, MntFlags::MNT_DETACH, "MNT_DETACH")
    }
}
